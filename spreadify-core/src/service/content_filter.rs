use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Minimum run length of one repeated character that counts as spam
const REPEATED_CHAR_RUN: usize = 5;

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https?://[^\s]+").expect("Invalid URL regex"));

static SHOUTING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]{5,}").expect("Invalid capitals regex"));

/// Content filtering error
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ContentFilterError {
    #[error("Message exceeds maximum length of {max_length} characters")]
    MessageTooLong { max_length: usize },

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Your message was flagged as spam ({reason})")]
    Spam { reason: &'static str },
}

impl From<ContentFilterError> for crate::Error {
    fn from(err: ContentFilterError) -> Self {
        match err {
            ContentFilterError::Spam { reason } => Self::Rejected {
                reason: reason.to_string(),
            },
            other => Self::InvalidInput(other.to_string()),
        }
    }
}

/// Screens chat messages before they are counted, stored or broadcast.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    pub max_message_length: usize,
}

impl ContentFilter {
    #[must_use]
    pub const fn new(max_message_length: usize) -> Self {
        Self { max_message_length }
    }

    /// Validate a chat message, returning it trimmed.
    pub fn filter_chat<'a>(&self, message: &'a str) -> Result<&'a str, ContentFilterError> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(ContentFilterError::EmptyMessage);
        }
        if trimmed.chars().count() > self.max_message_length {
            return Err(ContentFilterError::MessageTooLong {
                max_length: self.max_message_length,
            });
        }
        if let Some(reason) = spam_reason(trimmed) {
            return Err(ContentFilterError::Spam { reason });
        }
        Ok(trimmed)
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new(500)
    }
}

/// Name of the first spam heuristic the message trips, if any.
#[must_use]
pub fn spam_reason(message: &str) -> Option<&'static str> {
    if URL_PATTERN.is_match(message) {
        return Some("link");
    }
    if has_repeated_run(message, REPEATED_CHAR_RUN) {
        return Some("repeated characters");
    }
    if SHOUTING_PATTERN.is_match(message) {
        return Some("excessive capitals");
    }
    None
}

// The regex crate has no backreferences, so runs are counted directly.
fn has_repeated_run(message: &str, min_run: usize) -> bool {
    let mut previous = None;
    let mut run = 0;
    for c in message.chars() {
        if Some(c) == previous {
            run += 1;
        } else {
            previous = Some(c);
            run = 1;
        }
        if run >= min_run {
            return true;
        }
    }
    false
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::generate_id;

/// Authenticated identity of a chat participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub is_moderator: bool,
}

impl ChatUser {
    #[must_use]
    pub fn new(user_id: &str, username: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            is_moderator: false,
        }
    }

    #[must_use]
    pub fn moderator(user_id: &str, username: &str) -> Self {
        Self {
            is_moderator: true,
            ..Self::new(user_id, username)
        }
    }
}

/// Inbound frame from a chat client
#[derive(Debug, Clone, Deserialize)]
pub struct InboundChat {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatEventKind {
    Chat,
    Command,
    Error,
    System,
}

/// Outbound chat frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub kind: ChatEventKind,
    pub user_id: String,
    pub username: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ChatEvent {
    #[must_use]
    pub fn chat(user: &ChatUser, message: &str) -> Self {
        Self {
            kind: ChatEventKind::Chat,
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            message: message.to_string(),
            timestamp: Utc::now(),
            code: None,
        }
    }

    #[must_use]
    pub fn command(response: String) -> Self {
        Self::from_system(ChatEventKind::Command, response)
    }

    #[must_use]
    pub fn system(message: String) -> Self {
        Self::from_system(ChatEventKind::System, message)
    }

    #[must_use]
    pub fn error(code: &str, message: String) -> Self {
        let mut event = Self::from_system(ChatEventKind::Error, message);
        event.code = Some(code.to_string());
        event
    }

    fn from_system(kind: ChatEventKind, message: String) -> Self {
        Self {
            kind,
            user_id: "system".to_string(),
            username: "System".to_string(),
            message,
            timestamp: Utc::now(),
            code: None,
        }
    }
}

/// Persisted chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub stream_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(stream_id: &str, user: &ChatUser, content: &str) -> Self {
        Self {
            id: generate_id(),
            stream_id: stream_id.to_string(),
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// `!name` command with a canned response.
///
/// `{uptime}` in the response is replaced with the stream's uptime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCommand {
    pub name: String,
    pub response: String,
}

impl ChatCommand {
    /// Build a command, prefixing the name with `!` when missing.
    #[must_use]
    pub fn new(name: &str, response: &str) -> Self {
        Self {
            name: normalize_command_name(name),
            response: response.to_string(),
        }
    }
}

#[must_use]
pub fn normalize_command_name(name: &str) -> String {
    let name = name.trim();
    if name.starts_with('!') {
        name.to_string()
    } else {
        format!("!{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_event_shape() {
        let json = serde_json::to_value(ChatEvent::error("rate_limited", "slow down".to_string()))
            .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "rate_limited");
        assert_eq!(json["user_id"], "system");
    }

    #[test]
    fn test_chat_event_has_no_code() {
        let user = ChatUser::new("u1", "alice");
        let json = serde_json::to_value(ChatEvent::chat(&user, "hi")).unwrap();
        assert_eq!(json["type"], "chat");
        assert_eq!(json["username"], "alice");
        assert!(json.get("code").is_none());
    }

    #[test]
    fn test_command_name_normalized() {
        assert_eq!(ChatCommand::new("discord", "x").name, "!discord");
        assert_eq!(ChatCommand::new("!discord", "x").name, "!discord");
    }
}

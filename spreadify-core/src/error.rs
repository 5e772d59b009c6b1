use thiserror::Error;

use crate::models::credential::Platform;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Stream is already live: {0}")]
    AlreadyLive(String),

    #[error("No linked {platform} account for user {user_id}")]
    CredentialMissing { platform: Platform, user_id: String },

    #[error("{platform} rejected the request: {message}")]
    PlatformRejected {
        platform: Platform,
        status: Option<u16>,
        message: String,
    },

    #[error("Rendition {rendition} failed: {reason}")]
    RenditionFailed { rendition: String, reason: String },

    #[error("Rate limit exceeded. Please wait {retry_after_seconds} seconds.")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Message rejected: {reason}")]
    Rejected { reason: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable code, used in client-facing notices.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::AlreadyLive(_) => "already_live",
            Self::CredentialMissing { .. } => "credential_missing",
            Self::PlatformRejected { .. } => "platform_rejected",
            Self::RenditionFailed { .. } => "rendition_failed",
            Self::RateLimited { .. } => "rate_limited",
            Self::Rejected { .. } => "rejected",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidInput(_) => "invalid_input",
            Self::Process(_) | Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => {
                "internal"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Third-party platform a stream can be relayed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    Twitch,
    Facebook,
    LinkedIn,
}

impl Platform {
    pub const ALL: [Self; 4] = [Self::YouTube, Self::Twitch, Self::Facebook, Self::LinkedIn];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::YouTube => "youtube",
            Self::Twitch => "twitch",
            Self::Facebook => "facebook",
            Self::LinkedIn => "linkedin",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid platform: {s}"))
    }
}

/// OAuth credential linking a user to a destination platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationCredential {
    pub platform: Platform,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DestinationCredential {
    /// True when the token is expired or expires within `skew`.
    /// Tokens without an expiry never need a refresh.
    #[must_use]
    pub fn expires_within(&self, skew: Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at - skew <= Utc::now())
    }
}

/// Result of an OAuth refresh-token exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    /// Merge into an existing credential, keeping the old refresh token
    /// when the platform did not rotate it.
    #[must_use]
    pub fn into_credential(self, previous: &DestinationCredential) -> DestinationCredential {
        DestinationCredential {
            platform: previous.platform,
            access_token: self.access_token,
            refresh_token: self.refresh_token.or_else(|| previous.refresh_token.clone()),
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        }
    }
}

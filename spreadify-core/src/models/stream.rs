use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::credential::Platform;
use super::id::{generate_id, generate_stream_key};
use super::overlay::Overlay;

/// Lifecycle state of a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Created,
    Scheduled,
    Live,
    Ended,
}

impl StreamStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Scheduled => "scheduled",
            Self::Live => "live",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted stream record, owned by the storage collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    pub id: String,
    pub stream_key: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: StreamStatus,
    pub platforms: Vec<Platform>,
    pub overlays: Vec<Overlay>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub viewer_count: u32,
    pub peak_viewer_count: u32,
    pub duration_seconds: Option<i64>,
}

impl StreamRecord {
    /// New record in the `created` state with a fresh id and stream key.
    #[must_use]
    pub fn new(owner_id: &str, title: &str) -> Self {
        Self {
            id: generate_id(),
            stream_key: generate_stream_key(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            description: None,
            status: StreamStatus::Created,
            platforms: Vec::new(),
            overlays: Vec::new(),
            scheduled_for: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            viewer_count: 0,
            peak_viewer_count: 0,
            duration_seconds: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: StreamStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_platforms(mut self, platforms: Vec<Platform>) -> Self {
        self.platforms = platforms;
        self
    }

    /// Overlays that should be composited when encoding starts
    pub fn active_overlays(&self) -> impl Iterator<Item = &Overlay> {
        self.overlays.iter().filter(|o| o.active)
    }
}

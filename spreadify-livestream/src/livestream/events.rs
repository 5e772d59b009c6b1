use chrono::{DateTime, Utc};
use serde::Serialize;

use spreadify_core::models::Platform;

/// Published to billing and analytics consumers on lifecycle transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    StreamStarted {
        stream_id: String,
        stream_key: String,
        owner_id: String,
        started_at: DateTime<Utc>,
        destinations: Vec<Platform>,
    },
    StreamEnded {
        stream_id: String,
        stream_key: String,
        owner_id: String,
        ended_at: DateTime<Utc>,
        duration_seconds: i64,
        peak_viewers: u32,
    },
}

impl LifecycleEvent {
    #[must_use]
    pub fn stream_id(&self) -> &str {
        match self {
            Self::StreamStarted { stream_id, .. } | Self::StreamEnded { stream_id, .. } => stream_id,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StreamStarted { .. } => "stream_started",
            Self::StreamEnded { .. } => "stream_ended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = LifecycleEvent::StreamEnded {
            stream_id: "s1".to_string(),
            stream_key: "k1".to_string(),
            owner_id: "u1".to_string(),
            ended_at: Utc::now(),
            duration_seconds: 42,
            peak_viewers: 7,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "stream_ended");
        assert_eq!(json["duration_seconds"], 42);
        assert_eq!(event.name(), "stream_ended");
        assert_eq!(event.stream_id(), "s1");
    }
}

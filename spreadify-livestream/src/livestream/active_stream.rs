use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use spreadify_core::models::{Overlay, Platform, StreamRecord, StreamStatus};

use crate::relay::{RelayState, RelaySupervisor};
use crate::transcode::{RenditionReport, TranscodeSession, MASTER_PLAYLIST};

/// Relay status of one configured destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub platform: Platform,
    pub state: RelayState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_id: Option<String>,
}

/// Read-only snapshot of a live stream
#[derive(Debug, Clone, Serialize)]
pub struct ActiveStream {
    pub stream_id: String,
    #[serde(skip_serializing)]
    pub stream_key: String,
    pub owner_id: String,
    pub title: String,
    pub status: StreamStatus,
    pub started_at: DateTime<Utc>,
    pub viewer_count: u32,
    pub peak_viewer_count: u32,
    /// Platforms actually relayed to this session
    pub configured_destinations: Vec<Platform>,
    pub renditions: Vec<RenditionReport>,
    pub relays: Vec<RelayStatus>,
    pub overlays: Vec<Overlay>,
    /// Master playlist path relative to the playback root
    pub playback_path: String,
}

/// Live-stream bookkeeping owned by the stream manager
pub(crate) struct ActiveEntry {
    pub stream_id: String,
    pub stream_key: String,
    pub owner_id: String,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub viewer_count: u32,
    pub peak_viewer_count: u32,
    pub destinations: Vec<Platform>,
    pub overlays: Vec<Overlay>,
    pub session: Arc<TranscodeSession>,
}

impl ActiveEntry {
    pub fn new(
        record: &StreamRecord,
        started_at: DateTime<Utc>,
        destinations: Vec<Platform>,
        session: Arc<TranscodeSession>,
    ) -> Self {
        Self {
            stream_id: record.id.clone(),
            stream_key: record.stream_key.clone(),
            owner_id: record.owner_id.clone(),
            title: record.title.clone(),
            started_at,
            viewer_count: 0,
            peak_viewer_count: 0,
            destinations,
            overlays: record.active_overlays().cloned().collect(),
            session,
        }
    }

    pub fn record_viewers(&mut self, count: u32) {
        self.viewer_count = count;
        self.peak_viewer_count = self.peak_viewer_count.max(count);
    }

    pub fn snapshot(&self, relays: &RelaySupervisor) -> ActiveStream {
        ActiveStream {
            stream_id: self.stream_id.clone(),
            stream_key: self.stream_key.clone(),
            owner_id: self.owner_id.clone(),
            title: self.title.clone(),
            status: StreamStatus::Live,
            started_at: self.started_at,
            viewer_count: self.viewer_count,
            peak_viewer_count: self.peak_viewer_count,
            configured_destinations: self.destinations.clone(),
            renditions: self.session.statuses(),
            relays: self
                .destinations
                .iter()
                .map(|&platform| RelayStatus {
                    platform,
                    state: relays.state(&self.stream_id, platform),
                    broadcast_id: relays
                        .target(&self.stream_id, platform)
                        .map(|t| t.broadcast_id),
                })
                .collect(),
            overlays: self.overlays.clone(),
            playback_path: format!("/{}/{MASTER_PLAYLIST}", self.stream_id),
        }
    }
}

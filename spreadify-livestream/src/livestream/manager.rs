//! Stream lifecycle manager
//!
//! Owns the registry of live streams and drives the transitions
//! `created -> scheduled -> live -> ended`. Every transition of a stream key
//! runs under that key's lock, so a key is never live twice.

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::{error, info, warn, Instrument};

use spreadify_core::{
    config::IngestConfig,
    logging::stream_span,
    models::{Overlay, OverlayUpdate, Platform, StreamRecord, StreamStatus},
    repository::StreamRepository,
    service::{ChatRegistry, SignalingRegistry},
    Error, Result,
};

use super::active_stream::{ActiveEntry, ActiveStream};
use super::events::LifecycleEvent;
use crate::relay::RelaySupervisor;
use crate::transcode::TranscodeEngine;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct StreamManager {
    repository: Arc<dyn StreamRepository>,
    engine: TranscodeEngine,
    relays: Arc<RelaySupervisor>,
    signaling: SignalingRegistry,
    chat: ChatRegistry,
    ingest: IngestConfig,
    /// stream_key -> live stream
    active: DashMap<String, ActiveEntry>,
    /// Per-key transition locks
    locks: DashMap<String, Arc<Mutex<()>>>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl StreamManager {
    pub fn new(
        repository: Arc<dyn StreamRepository>,
        engine: TranscodeEngine,
        relays: Arc<RelaySupervisor>,
        signaling: SignalingRegistry,
        chat: ChatRegistry,
        ingest: IngestConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            repository,
            engine,
            relays,
            signaling,
            chat,
            ingest,
            active: DashMap::new(),
            locks: DashMap::new(),
            events,
        }
    }

    #[must_use]
    pub const fn signaling(&self) -> &SignalingRegistry {
        &self.signaling
    }

    #[must_use]
    pub const fn chat(&self) -> &ChatRegistry {
        &self.chat
    }

    #[must_use]
    pub const fn engine(&self) -> &TranscodeEngine {
        &self.engine
    }

    #[must_use]
    pub fn relays(&self) -> &RelaySupervisor {
        &self.relays
    }

    /// Receive lifecycle events from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    async fn lock_key(&self, stream_key: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.locks
                .entry(stream_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        lock.lock_owned().await
    }

    /// Drop the key's lock once nobody holds or waits on it
    fn release_lock(&self, stream_key: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.locks
            .remove_if(stream_key, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn find_record(&self, stream_key: &str) -> Result<StreamRecord> {
        self.repository
            .find_by_key(stream_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Stream key {stream_key}")))
    }

    /// `created -> scheduled`
    pub async fn schedule(&self, stream_key: &str) -> Result<StreamRecord> {
        let guard = self.lock_key(stream_key).await;
        let result = async {
            let mut record = self.find_record(stream_key).await?;
            if record.status != StreamStatus::Created {
                return Err(Error::InvalidState(format!(
                    "Stream {} is {}, only created streams can be scheduled",
                    record.id, record.status
                )));
            }
            record.status = StreamStatus::Scheduled;
            self.repository.save(&record).await?;
            info!(stream_id = %record.id, "Stream scheduled");
            Ok(record)
        }
        .await;
        self.release_lock(stream_key, guard);
        result
    }

    /// The ingest server accepted a feed for `stream_key`: go live.
    ///
    /// Encoding must start for at least one rendition; relays are
    /// best-effort and a failing platform is left out of this session.
    ///
    /// The transition runs on its own task and completes even when the
    /// caller stops waiting, so a key is never left half started.
    pub async fn connect(self: &Arc<Self>, stream_key: &str) -> Result<ActiveStream> {
        let manager = Arc::clone(self);
        let stream_key = stream_key.to_string();
        let span = stream_span("connect", &stream_key);
        tokio::spawn(
            async move {
                let guard = manager.lock_key(&stream_key).await;
                let result = manager.connect_locked(&stream_key).await;
                manager.release_lock(&stream_key, guard);
                result
            }
            .instrument(span),
        )
        .await
        .map_err(|e| Error::Internal(format!("connect task failed: {e}")))?
    }

    async fn connect_locked(&self, stream_key: &str) -> Result<ActiveStream> {
        let mut record = self.find_record(stream_key).await?;

        if self.active.contains_key(stream_key) {
            return Err(Error::AlreadyLive(record.id));
        }
        match record.status {
            StreamStatus::Scheduled => {}
            // Nothing runs for it here; the last session ended without persisting
            StreamStatus::Live => {
                warn!(stream_id = %record.id, "Stream record is live without a session, restarting");
            }
            status => {
                return Err(Error::InvalidState(format!(
                    "Stream {} is {status}, only scheduled streams can go live",
                    record.id
                )));
            }
        }

        let started_at = Utc::now();
        record.status = StreamStatus::Live;
        record.started_at = Some(started_at);
        record.ended_at = None;
        record.duration_seconds = None;
        record.viewer_count = 0;
        record.peak_viewer_count = 0;
        self.repository.save(&record).await?;

        let input_url = self.ingest.feed_url(stream_key);
        let overlays: Vec<Overlay> = record.active_overlays().cloned().collect();

        let session = match self.engine.start(&record.id, &input_url, &overlays).await {
            Ok(session) => session,
            Err(e) => {
                warn!(stream_id = %record.id, error = %e, "Encoding failed to start, rolling back");
                record.status = StreamStatus::Scheduled;
                record.started_at = None;
                if let Err(save_err) = self.repository.save(&record).await {
                    error!(stream_id = %record.id, error = %save_err, "Failed to roll back stream record");
                }
                return Err(e);
            }
        };

        let destinations = self.start_relays(&record, &input_url).await;

        self.chat.open_room(&record.id, started_at);

        let entry = ActiveEntry::new(&record, started_at, destinations.clone(), session);
        let snapshot = entry.snapshot(&self.relays);
        self.active.insert(stream_key.to_string(), entry);

        let _ = self.events.send(LifecycleEvent::StreamStarted {
            stream_id: record.id.clone(),
            stream_key: stream_key.to_string(),
            owner_id: record.owner_id.clone(),
            started_at,
            destinations: destinations.clone(),
        });

        info!(
            stream_id = %record.id,
            renditions = snapshot.renditions.len(),
            destinations = ?destinations,
            "Stream is live"
        );
        Ok(snapshot)
    }

    /// Start every configured relay concurrently; returns the platforms that started.
    async fn start_relays(&self, record: &StreamRecord, input_url: &str) -> Vec<Platform> {
        let results = join_all(record.platforms.iter().map(|&platform| async move {
            (platform, self.relays.start(record, platform, input_url).await)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(platform, result)| match result {
                Ok(_) => Some(platform),
                Err(e) => {
                    warn!(
                        stream_id = %record.id,
                        platform = %platform,
                        error = %e,
                        "Relay failed, continuing without it"
                    );
                    None
                }
            })
            .collect()
    }

    /// The feed for `stream_key` went away: persist final stats, then tear down.
    ///
    /// Like [`connect`](Self::connect) it runs to completion on its own task.
    /// When the final record cannot be saved the stream stays live.
    pub async fn disconnect(self: &Arc<Self>, stream_key: &str) -> Result<StreamRecord> {
        let manager = Arc::clone(self);
        let stream_key = stream_key.to_string();
        let span = stream_span("disconnect", &stream_key);
        tokio::spawn(
            async move {
                let guard = manager.lock_key(&stream_key).await;
                let result = manager.disconnect_locked(&stream_key).await;
                manager.release_lock(&stream_key, guard);
                result
            }
            .instrument(span),
        )
        .await
        .map_err(|e| Error::Internal(format!("disconnect task failed: {e}")))?
    }

    async fn disconnect_locked(&self, stream_key: &str) -> Result<StreamRecord> {
        let live = self
            .active
            .get(stream_key)
            .map(|entry| (entry.started_at, entry.viewer_count, entry.peak_viewer_count));
        let Some((started_at, viewer_count, peak_viewer_count)) = live else {
            let record = self.find_record(stream_key).await?;
            return Err(Error::InvalidState(format!(
                "Stream {} is {}, only live streams can disconnect",
                record.id, record.status
            )));
        };

        let ended_at = Utc::now();
        let duration_seconds = (ended_at - started_at).num_seconds().max(0);

        let mut record = self.find_record(stream_key).await?;
        record.status = StreamStatus::Ended;
        record.ended_at = Some(ended_at);
        record.duration_seconds = Some(duration_seconds);
        record.viewer_count = viewer_count;
        record.peak_viewer_count = record.peak_viewer_count.max(peak_viewer_count);
        self.repository.save(&record).await?;

        let relays_stopped = match self.active.remove(stream_key) {
            Some((_, entry)) => {
                let (stopped, ()) = tokio::join!(
                    self.relays.stop_all(&entry.stream_id),
                    entry.session.stop()
                );
                stopped
            }
            None => 0,
        };

        self.signaling.close_room(&record.id);
        self.chat.close_room(&record.id);

        let _ = self.events.send(LifecycleEvent::StreamEnded {
            stream_id: record.id.clone(),
            stream_key: stream_key.to_string(),
            owner_id: record.owner_id.clone(),
            ended_at,
            duration_seconds,
            peak_viewers: record.peak_viewer_count,
        });

        info!(
            stream_id = %record.id,
            duration_seconds,
            peak_viewers = record.peak_viewer_count,
            relays_stopped,
            "Stream ended"
        );
        Ok(record)
    }

    /// Record the current audience of a live stream. Negative counts clamp to 0.
    pub async fn update_viewer_count(&self, stream_key: &str, count: i64) -> Result<u32> {
        let count = u32::try_from(count.max(0)).unwrap_or(u32::MAX);

        let updated = self
            .active
            .get_mut(stream_key)
            .map(|mut entry| entry.record_viewers(count))
            .is_some();

        if !updated {
            let record = self.find_record(stream_key).await?;
            return Err(Error::InvalidState(format!(
                "Stream {} is {}, viewer counts apply to live streams only",
                record.id, record.status
            )));
        }

        if let Err(e) = self.repository.update_viewer_count(stream_key, count).await {
            warn!(stream_key = %stream_key, error = %e, "Failed to persist viewer count");
        }
        Ok(count)
    }

    #[must_use]
    pub fn active_stream(&self, stream_key: &str) -> Option<ActiveStream> {
        self.active
            .get(stream_key)
            .map(|entry| entry.snapshot(&self.relays))
    }

    /// Live streams, oldest first, optionally limited to one owner
    #[must_use]
    pub fn list_active(&self, owner_id: Option<&str>) -> Vec<ActiveStream> {
        let mut streams: Vec<ActiveStream> = self
            .active
            .iter()
            .filter(|entry| owner_id.is_none_or(|owner| entry.owner_id == owner))
            .map(|entry| entry.snapshot(&self.relays))
            .collect();
        streams.sort_by_key(|s| s.started_at);
        streams
    }

    #[must_use]
    pub fn is_live(&self, stream_key: &str) -> bool {
        self.active.contains_key(stream_key)
    }

    async fn owned_record(&self, stream_key: &str, owner_id: &str) -> Result<StreamRecord> {
        let record = self.find_record(stream_key).await?;
        if record.owner_id != owner_id {
            return Err(Error::Forbidden(format!(
                "User {owner_id} does not own stream {}",
                record.id
            )));
        }
        Ok(record)
    }

    fn note_deferred_overlay_change(&self, stream_key: &str, record: &StreamRecord) {
        if self.is_live(stream_key) {
            info!(stream_id = %record.id, "Overlay change applies from the next broadcast");
        }
    }

    pub async fn add_overlay(
        &self,
        stream_key: &str,
        owner_id: &str,
        overlay: Overlay,
    ) -> Result<Overlay> {
        overlay.validate().map_err(Error::InvalidInput)?;

        let guard = self.lock_key(stream_key).await;
        let result = async {
            let mut record = self.owned_record(stream_key, owner_id).await?;
            record.overlays.push(overlay.clone());
            self.repository.save(&record).await?;
            self.note_deferred_overlay_change(stream_key, &record);
            Ok(overlay)
        }
        .await;
        self.release_lock(stream_key, guard);
        result
    }

    pub async fn update_overlay(
        &self,
        stream_key: &str,
        owner_id: &str,
        overlay_id: &str,
        update: OverlayUpdate,
    ) -> Result<Overlay> {
        let guard = self.lock_key(stream_key).await;
        let result = async {
            let mut record = self.owned_record(stream_key, owner_id).await?;
            let overlay = record
                .overlays
                .iter_mut()
                .find(|o| o.id == overlay_id)
                .ok_or_else(|| Error::NotFound(format!("Overlay {overlay_id}")))?;

            let mut updated = overlay.clone();
            update.apply(&mut updated);
            updated.validate().map_err(Error::InvalidInput)?;
            *overlay = updated.clone();

            self.repository.save(&record).await?;
            self.note_deferred_overlay_change(stream_key, &record);
            Ok(updated)
        }
        .await;
        self.release_lock(stream_key, guard);
        result
    }

    pub async fn remove_overlay(
        &self,
        stream_key: &str,
        owner_id: &str,
        overlay_id: &str,
    ) -> Result<Overlay> {
        let guard = self.lock_key(stream_key).await;
        let result = async {
            let mut record = self.owned_record(stream_key, owner_id).await?;
            let index = record
                .overlays
                .iter()
                .position(|o| o.id == overlay_id)
                .ok_or_else(|| Error::NotFound(format!("Overlay {overlay_id}")))?;
            let removed = record.overlays.remove(index);

            self.repository.save(&record).await?;
            self.note_deferred_overlay_change(stream_key, &record);
            Ok(removed)
        }
        .await;
        self.release_lock(stream_key, guard);
        result
    }

    /// End every live stream. Returns how many were ended cleanly.
    pub async fn shutdown(self: &Arc<Self>) -> usize {
        let keys: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        if keys.is_empty() {
            return 0;
        }
        info!(streams = keys.len(), "Ending live streams for shutdown");

        join_all(keys.iter().map(|key| async move {
            match self.disconnect(key).await {
                Ok(_) => true,
                Err(e) => {
                    error!(stream_key = %key, error = %e, "Failed to end stream during shutdown");
                    false
                }
            }
        }))
        .await
        .into_iter()
        .filter(|ok| *ok)
        .count()
    }
}

//! Per-stream HLS encoding
//!
//! One ffmpeg process per rendition. A rendition that fails is isolated from
//! its siblings; the stream only fails to start when every rendition fails.

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use spreadify_core::{
    config::TranscodeConfig,
    models::{EncodingStatus, Overlay, Rendition},
    Error, Result,
};

use super::command::{encoder_args, EncoderJob};
use super::ladder::QualityLadder;
use super::manifest::{write_master_playlist, MASTER_PLAYLIST, RENDITION_PLAYLIST};
use super::probe::has_audio;
use crate::process::{ProcessTracker, SupervisedProcess};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Status of one rendition as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenditionReport {
    pub name: String,
    pub status: EncodingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug)]
struct RenditionState {
    status: EncodingStatus,
    failure: Option<String>,
}

#[derive(Debug)]
struct RenditionSlot {
    rendition: Rendition,
    dir: PathBuf,
    process: Option<SupervisedProcess>,
    state: Mutex<RenditionState>,
}

impl RenditionSlot {
    fn status(&self) -> EncodingStatus {
        self.state.lock().status
    }

    fn set_status(&self, status: EncodingStatus) {
        self.state.lock().status = status;
    }

    fn fail(&self, reason: String) {
        let mut state = self.state.lock();
        state.status = EncodingStatus::Failed;
        state.failure = Some(reason);
    }

    fn playlist_path(&self) -> PathBuf {
        self.dir.join(RENDITION_PLAYLIST)
    }

    fn report(&self) -> RenditionReport {
        let state = self.state.lock();
        RenditionReport {
            name: self.rendition.name.clone(),
            status: state.status,
            failure: state.failure.clone(),
        }
    }
}

/// Starts encoding sessions for live streams.
#[derive(Debug, Clone)]
pub struct TranscodeEngine {
    config: TranscodeConfig,
    ladder: QualityLadder,
    tracker: ProcessTracker,
}

impl TranscodeEngine {
    pub fn new(config: TranscodeConfig, tracker: ProcessTracker) -> Result<Self> {
        let ladder = QualityLadder::from_config(&config)?;
        Ok(Self {
            config,
            ladder,
            tracker,
        })
    }

    #[must_use]
    pub const fn ladder(&self) -> &QualityLadder {
        &self.ladder
    }

    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.config.output_dir
    }

    #[must_use]
    pub fn stream_dir(&self, stream_id: &str) -> PathBuf {
        self.config.output_dir.join(stream_id)
    }

    /// Start every rendition of the ladder for `stream_id`.
    ///
    /// Returns once each rendition has either produced its playlist, exited,
    /// or used up the readiness window. Fails with `RenditionFailed` only when
    /// no rendition survives, after cleaning up whatever was started.
    pub async fn start(
        &self,
        stream_id: &str,
        input_url: &str,
        overlays: &[Overlay],
    ) -> Result<Arc<TranscodeSession>> {
        validate_stream_id(stream_id)?;

        let span = info_span!("transcode", stream_id = %stream_id);
        let audio = has_audio(&self.config.ffprobe_path, input_url, self.config.probe_timeout())
            .instrument(span.clone())
            .await;

        let output_dir = self.stream_dir(stream_id);
        prepare_output(&output_dir, self.ladder.renditions()).await?;

        let mut slots = Vec::with_capacity(self.ladder.len());
        for rendition in self.ladder.renditions() {
            let dir = output_dir.join(&rendition.name);
            let args = encoder_args(&EncoderJob {
                input_url,
                rendition,
                overlays,
                has_audio: audio,
                output_dir: &dir,
                segment_seconds: self.config.segment_seconds,
                playlist_size: self.config.playlist_size,
            });

            let (process, state) = match SupervisedProcess::spawn(
                format!("{stream_id}/{}", rendition.name),
                &self.config.ffmpeg_path,
                &args,
                &self.tracker,
            ) {
                Ok(process) => (
                    Some(process),
                    RenditionState {
                        status: EncodingStatus::Encoding,
                        failure: None,
                    },
                ),
                Err(e) => {
                    warn!(parent: &span, rendition = %rendition.name, error = %e, "Rendition failed to launch");
                    (
                        None,
                        RenditionState {
                            status: EncodingStatus::Failed,
                            failure: Some(e.to_string()),
                        },
                    )
                }
            };

            slots.push(Arc::new(RenditionSlot {
                rendition: rendition.clone(),
                dir,
                process,
                state: Mutex::new(state),
            }));
        }

        let session = TranscodeSession {
            stream_id: stream_id.to_string(),
            output_dir,
            slots,
            cancel: CancellationToken::new(),
            stop_grace: self.config.stop_grace(),
        };

        let deadline = Instant::now() + self.config.ready_timeout();
        join_all(session.slots.iter().map(|slot| await_ready(slot, deadline)))
            .instrument(span.clone())
            .await;

        for slot in session.slots.iter().filter(|s| s.status().is_failed()) {
            let report = slot.report();
            let err = Error::RenditionFailed {
                rendition: report.name,
                reason: report.failure.unwrap_or_default(),
            };
            warn!(parent: &span, error = %err, "Rendition failed");
        }

        if session.slots.iter().all(|s| s.status().is_failed()) {
            let reason = session
                .failures()
                .iter()
                .map(|r| format!("{}: {}", r.name, r.failure.as_deref().unwrap_or("unknown")))
                .collect::<Vec<_>>()
                .join("; ");
            session.stop().await;
            return Err(Error::RenditionFailed {
                rendition: "all".to_string(),
                reason,
            });
        }

        if let Err(e) = session.write_master().await {
            session.stop().await;
            return Err(e);
        }

        let session = Arc::new(session);
        session.spawn_monitors(&span);

        info!(
            parent: &span,
            has_audio = audio,
            renditions = session.slots.len(),
            failed = session.failures().len(),
            "Encoding started"
        );
        Ok(session)
    }
}

/// Wait until the rendition writes its playlist or exits, bounded by `deadline`.
async fn await_ready(slot: &RenditionSlot, deadline: Instant) {
    let Some(process) = &slot.process else {
        return;
    };

    loop {
        if process.exit_status().is_some() {
            slot.fail(process.failure_reason());
            return;
        }
        if playlist_exists(&slot.playlist_path()).await {
            slot.set_status(EncodingStatus::Ready);
            debug!(rendition = %slot.rendition.name, "Rendition ready");
            return;
        }
        if Instant::now() >= deadline {
            debug!(rendition = %slot.rendition.name, "Rendition not ready yet, still encoding");
            return;
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

async fn playlist_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Fresh output directory with one subdirectory per rendition. Nothing is
/// left behind when a directory cannot be created.
async fn prepare_output(output_dir: &Path, renditions: &[Rendition]) -> Result<()> {
    remove_dir_if_exists(output_dir).await?;
    for rendition in renditions {
        if let Err(e) = tokio::fs::create_dir_all(output_dir.join(&rendition.name)).await {
            if let Err(cleanup) = remove_dir_if_exists(output_dir).await {
                warn!(dir = %output_dir.display(), error = %cleanup, "Failed to remove partial output");
            }
            return Err(e.into());
        }
    }
    Ok(())
}

async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// The id becomes a directory name under the output root
fn validate_stream_id(stream_id: &str) -> Result<()> {
    if stream_id.is_empty()
        || !stream_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidInput(format!(
            "stream id '{stream_id}' is not a valid path component"
        )));
    }
    Ok(())
}

/// Running encoders of one stream. Dropping the session kills them.
#[derive(Debug)]
pub struct TranscodeSession {
    stream_id: String,
    output_dir: PathBuf,
    slots: Vec<Arc<RenditionSlot>>,
    cancel: CancellationToken,
    stop_grace: Duration,
}

impl TranscodeSession {
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    #[must_use]
    pub fn master_playlist_path(&self) -> PathBuf {
        self.output_dir.join(MASTER_PLAYLIST)
    }

    /// Status of every rendition in ladder order
    #[must_use]
    pub fn statuses(&self) -> Vec<RenditionReport> {
        self.slots.iter().map(|s| s.report()).collect()
    }

    #[must_use]
    pub fn failures(&self) -> Vec<RenditionReport> {
        self.statuses()
            .into_iter()
            .filter(|r| r.status.is_failed())
            .collect()
    }

    /// Number of encoder processes still running
    #[must_use]
    pub fn running(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.process.as_ref().is_some_and(SupervisedProcess::is_running))
            .count()
    }

    async fn write_master(&self) -> Result<()> {
        write_master_playlist(&self.output_dir, surviving(&self.slots)).await
    }

    fn spawn_monitors(self: &Arc<Self>, span: &tracing::Span) {
        for slot in &self.slots {
            if slot.process.is_none() || slot.status().is_failed() {
                continue;
            }
            let slot = Arc::clone(slot);
            let slots = self.slots.clone();
            let output_dir = self.output_dir.clone();
            let cancel = self.cancel.clone();

            tokio::spawn(
                async move {
                    let Some(process) = &slot.process else {
                        return;
                    };
                    let mut poll = tokio::time::interval(MONITOR_POLL_INTERVAL);
                    loop {
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => return,
                            exit = process.wait() => {
                                let reason = process.failure_reason();
                                warn!(
                                    rendition = %slot.rendition.name,
                                    exit = %exit,
                                    reason = %reason,
                                    "Rendition stopped unexpectedly"
                                );
                                slot.fail(reason);
                                if !cancel.is_cancelled() {
                                    if let Err(e) =
                                        write_master_playlist(&output_dir, surviving(&slots)).await
                                    {
                                        debug!(error = %e, "Could not rewrite master playlist");
                                    }
                                }
                                return;
                            }
                            _ = poll.tick(), if slot.status() == EncodingStatus::Encoding => {
                                if playlist_exists(&slot.playlist_path()).await {
                                    slot.set_status(EncodingStatus::Ready);
                                    debug!(rendition = %slot.rendition.name, "Rendition ready");
                                }
                            }
                        }
                    }
                }
                .instrument(span.clone()),
            );
        }
    }

    /// Stop every encoder and delete the stream's output directory.
    ///
    /// Idempotent, and safe on a session whose start only partly succeeded.
    pub async fn stop(&self) {
        self.cancel.cancel();

        join_all(
            self.slots
                .iter()
                .filter_map(|s| s.process.as_ref())
                .map(|p| p.stop(self.stop_grace)),
        )
        .await;

        if let Err(e) = remove_dir_if_exists(&self.output_dir).await {
            warn!(
                stream_id = %self.stream_id,
                dir = %self.output_dir.display(),
                error = %e,
                "Failed to remove stream output"
            );
        }
        debug!(stream_id = %self.stream_id, "Encoding stopped");
    }
}

impl Drop for TranscodeSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn surviving(slots: &[Arc<RenditionSlot>]) -> Vec<&Rendition> {
    slots
        .iter()
        .filter(|s| !s.status().is_failed())
        .map(|s| &s.rendition)
        .collect()
}

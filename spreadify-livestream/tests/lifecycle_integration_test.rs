// Integration tests for the stream lifecycle
//
// Runs the manager against stand-in ffmpeg/ffprobe scripts and mocked
// platform APIs:
// - going live starts every rendition and writes the master playlist
// - partial relay fan-out when one platform rejects provisioning
// - concurrent connects for one key
// - rendition failures, total encoding failure and rollback
// - overlays in the encoder arguments
// - teardown leaves no processes or output behind
// - abandoned connects and failing persistence
#![cfg(unix)]

use async_trait::async_trait;
use serde_json::json;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use spreadify_core::config::{ChatConfig, IngestConfig, RelayConfig, TranscodeConfig};
use spreadify_core::models::{
    ChatEventKind, ChatUser, DestinationCredential, EncodingStatus, Overlay, OverlayUpdate,
    Platform, StreamRecord, StreamStatus,
};
use spreadify_core::repository::{
    MemoryBlockList, MemoryChatStore, MemoryCredentialStore, MemoryStreamRepository,
    StreamRepository,
};
use spreadify_core::service::{ChatRegistry, SignalingRegistry};
use spreadify_core::Error;
use spreadify_livestream::relay::RelayState;
use spreadify_livestream::transcode::manifest::variant_count;
use spreadify_livestream::{
    LifecycleEvent, ProcessTracker, RelaySupervisor, StreamManager, TranscodeEngine,
};

/// Records its arguments, writes the playlist named by its last argument and
/// waits for a line on stdin. Renditions listed in `failing` crash instead.
fn fake_ffmpeg(log: &Path, failing: &[&str]) -> String {
    let mut script = format!(
        "#!/bin/sh\nfor last; do :; done\necho \"$*\" >> \"{}\"\n",
        log.display()
    );
    for name in failing {
        script.push_str(&format!(
            "case \"$last\" in */{name}/index.m3u8) echo \"encoder crashed\" >&2; exit 1 ;; esac\n"
        ));
    }
    script.push_str("case \"$last\" in *.m3u8) echo '#EXTM3U' > \"$last\" ;; esac\nread _\n");
    script
}

/// Never writes a playlist, so readiness always runs into its deadline
const STALLED_FFMPEG: &str = "#!/bin/sh\nread _\n";

const FAKE_FFPROBE: &str = "#!/bin/sh\necho '{\"streams\":[{\"codec_type\":\"audio\"}]}'\n";

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Memory repository whose saves can be made to fail
#[derive(Default)]
struct FlakyRepository {
    records: MemoryStreamRepository,
    fail_saves: AtomicBool,
}

impl FlakyRepository {
    fn insert(&self, record: StreamRecord) {
        self.records.insert(record);
    }

    fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StreamRepository for FlakyRepository {
    async fn find_by_key(&self, stream_key: &str) -> spreadify_core::Result<Option<StreamRecord>> {
        self.records.find_by_key(stream_key).await
    }

    async fn find_by_id(&self, stream_id: &str) -> spreadify_core::Result<Option<StreamRecord>> {
        self.records.find_by_id(stream_id).await
    }

    async fn save(&self, record: &StreamRecord) -> spreadify_core::Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Internal("database unavailable".to_string()));
        }
        self.records.save(record).await
    }

    async fn update_viewer_count(&self, stream_key: &str, count: u32) -> spreadify_core::Result<()> {
        self.records.update_viewer_count(stream_key, count).await
    }
}

struct Harness {
    dir: TempDir,
    repository: Arc<FlakyRepository>,
    credentials: Arc<MemoryCredentialStore>,
    tracker: ProcessTracker,
    manager: Arc<StreamManager>,
}

impl Harness {
    fn new(failing: &[&str], api_base: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_ffmpeg(&dir.path().join("ffmpeg.log"), failing);
        Self::with_encoder(dir, &script, 5_000, api_base)
    }

    fn with_encoder(dir: TempDir, script: &str, ready_timeout_ms: u64, api_base: Option<&str>) -> Self {
        let ffmpeg = dir.path().join("ffmpeg");
        let ffprobe = dir.path().join("ffprobe");
        write_script(&ffmpeg, script);
        write_script(&ffprobe, FAKE_FFPROBE);
        let ffmpeg_path = ffmpeg.to_string_lossy().into_owned();

        let transcode = TranscodeConfig {
            ffmpeg_path: ffmpeg_path.clone(),
            ffprobe_path: ffprobe.to_string_lossy().into_owned(),
            output_dir: dir.path().join("streams"),
            ready_timeout_ms,
            stop_grace_ms: 2_000,
            ..Default::default()
        };
        let mut relay = RelayConfig {
            ffmpeg_path,
            stop_grace_ms: 2_000,
            ..Default::default()
        };
        if let Some(base) = api_base {
            relay.youtube.api_base = base.to_string();
            relay.twitch.api_base = base.to_string();
            relay.facebook.api_base = base.to_string();
            relay.linkedin.api_base = base.to_string();
        }

        let tracker = ProcessTracker::new();
        let repository = Arc::new(FlakyRepository::default());
        let credentials = Arc::new(MemoryCredentialStore::new());
        let engine = TranscodeEngine::new(transcode, tracker.clone()).unwrap();
        let relays =
            Arc::new(RelaySupervisor::new(&relay, credentials.clone(), tracker.clone()).unwrap());
        let chat = ChatRegistry::new(
            &ChatConfig::default(),
            Arc::new(MemoryChatStore::new()),
            Arc::new(MemoryBlockList::new()),
        );
        let manager = Arc::new(StreamManager::new(
            repository.clone(),
            engine,
            relays,
            SignalingRegistry::new(),
            chat,
            IngestConfig::default(),
        ));

        Self {
            dir,
            repository,
            credentials,
            tracker,
            manager,
        }
    }

    /// A scheduled stream whose id and key are both `key`
    fn scheduled_stream(&self, key: &str, platforms: Vec<Platform>) -> StreamRecord {
        let mut record = StreamRecord::new("owner", "Launch day")
            .with_status(StreamStatus::Scheduled)
            .with_platforms(platforms);
        record.id = key.to_string();
        record.stream_key = key.to_string();
        self.repository.insert(record.clone());
        record
    }

    fn link(&self, platform: Platform) {
        self.credentials.link(
            "owner",
            DestinationCredential {
                platform,
                access_token: format!("{platform}-token"),
                refresh_token: None,
                expires_at: None,
            },
        );
    }

    fn stream_dir(&self, stream_id: &str) -> PathBuf {
        self.dir.path().join("streams").join(stream_id)
    }

    fn encoder_invocations(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("ffmpeg.log"))
            .unwrap_or_default()
            .lines()
            .filter(|l| l.contains("-f hls"))
            .map(String::from)
            .collect()
    }

    async fn record(&self, key: &str) -> StreamRecord {
        self.repository.find_by_key(key).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_connect_goes_live_with_every_rendition() {
    let h = Harness::new(&[], None);
    h.scheduled_stream("abc123", vec![]);
    let mut events = h.manager.subscribe();

    let active = h.manager.connect("abc123").await.unwrap();

    assert_eq!(active.status, StreamStatus::Live);
    assert_eq!(active.playback_path, "/abc123/master.m3u8");
    assert_eq!(active.renditions.len(), 4);
    assert!(active
        .renditions
        .iter()
        .all(|r| matches!(r.status, EncodingStatus::Encoding | EncodingStatus::Ready)));
    assert_eq!(h.tracker.live(), 4);

    let master = std::fs::read_to_string(h.stream_dir("abc123").join("master.m3u8")).unwrap();
    assert_eq!(variant_count(&master), 4);
    assert!(master.contains("1080p/index.m3u8"));

    let record = h.record("abc123").await;
    assert_eq!(record.status, StreamStatus::Live);
    assert!(record.started_at.is_some());

    match events.recv().await.unwrap() {
        LifecycleEvent::StreamStarted { stream_id, destinations, .. } => {
            assert_eq!(stream_id, "abc123");
            assert!(destinations.is_empty());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Audio was detected, so every rendition encodes it
    assert!(h.encoder_invocations().iter().all(|args| args.contains("-c:a aac")));

    let ended = h.manager.disconnect("abc123").await.unwrap();
    assert_eq!(ended.status, StreamStatus::Ended);
    assert!(ended.duration_seconds.is_some());
    assert!(!h.stream_dir("abc123").exists());
    assert_eq!(h.tracker.live(), 0);
    assert!(h.manager.active_stream("abc123").is_none());
    assert_eq!(events.recv().await.unwrap().name(), "stream_ended");
}

#[tokio::test]
async fn test_one_platform_failing_does_not_block_others() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/liveBroadcasts"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backendError"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "id": "77" }] })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/channels"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/streams/key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "stream_key": "live_77" }] })),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/streams"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::new(&[], Some(&server.uri()));
    h.link(Platform::YouTube);
    h.link(Platform::Twitch);
    h.scheduled_stream("fanout", vec![Platform::YouTube, Platform::Twitch]);

    let active = h.manager.connect("fanout").await.unwrap();

    assert_eq!(active.configured_destinations, vec![Platform::Twitch]);
    assert_eq!(active.relays.len(), 1);
    assert_eq!(active.relays[0].state, RelayState::Forwarding);
    assert_eq!(
        h.manager.relays().state("fanout", Platform::YouTube),
        RelayState::Idle
    );
    // four encoders and one forwarder
    assert_eq!(h.tracker.live(), 5);

    h.manager.disconnect("fanout").await.unwrap();
    assert_eq!(h.tracker.live(), 0);
}

#[tokio::test]
async fn test_missing_credential_skips_platform() {
    let h = Harness::new(&[], Some("http://127.0.0.1:9"));
    h.scheduled_stream("nocreds", vec![Platform::Facebook]);

    let active = h.manager.connect("nocreds").await.unwrap();
    assert!(active.configured_destinations.is_empty());
    assert_eq!(h.tracker.live(), 4);

    h.manager.disconnect("nocreds").await.unwrap();
    assert_eq!(h.tracker.live(), 0);
}

#[tokio::test]
async fn test_concurrent_connects_yield_one_live_stream() {
    let h = Harness::new(&[], None);
    h.scheduled_stream("race", vec![]);

    let attempts = (0..6).map(|_| {
        let manager = Arc::clone(&h.manager);
        tokio::spawn(async move { manager.connect("race").await })
    });
    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::AlreadyLive(_))));
    assert_eq!(h.manager.list_active(None).len(), 1);
    assert_eq!(h.tracker.live(), 4);

    h.manager.disconnect("race").await.unwrap();
    assert_eq!(h.tracker.live(), 0);
}

#[tokio::test]
async fn test_single_rendition_failure_is_isolated() {
    let h = Harness::new(&["720p"], None);
    h.scheduled_stream("partial", vec![]);

    let active = h.manager.connect("partial").await.unwrap();

    let failed: Vec<_> = active
        .renditions
        .iter()
        .filter(|r| r.status == EncodingStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "720p");
    assert!(failed[0].failure.as_deref().unwrap().starts_with("exit code 1"));

    let master = std::fs::read_to_string(h.stream_dir("partial").join("master.m3u8")).unwrap();
    assert_eq!(variant_count(&master), 3);
    assert!(!master.contains("720p"));

    h.manager.disconnect("partial").await.unwrap();
    assert_eq!(h.tracker.live(), 0);
}

#[tokio::test]
async fn test_total_encoding_failure_rolls_back() {
    let h = Harness::new(&["1080p", "720p", "480p", "360p"], None);
    h.scheduled_stream("doomed", vec![]);

    let err = h.manager.connect("doomed").await.unwrap_err();
    assert!(matches!(err, Error::RenditionFailed { .. }));

    let record = h.record("doomed").await;
    assert_eq!(record.status, StreamStatus::Scheduled);
    assert!(record.started_at.is_none());
    assert!(!h.manager.is_live("doomed"));
    assert!(!h.stream_dir("doomed").exists());
    assert_eq!(h.tracker.live(), 0);

    // disconnecting a stream that never went live is a state error
    assert!(matches!(
        h.manager.disconnect("doomed").await,
        Err(Error::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_overlays_reach_every_rendition() {
    let h = Harness::new(&[], None);
    h.scheduled_stream("branded", vec![]);

    let logo = h
        .manager
        .add_overlay("branded", "owner", Overlay::new("/assets/logo.png", 10, 20, 50))
        .await
        .unwrap();
    let mut hidden = Overlay::new("/assets/hidden.png", 0, 0, 100);
    hidden.active = false;
    h.manager.add_overlay("branded", "owner", hidden).await.unwrap();

    let active = h.manager.connect("branded").await.unwrap();
    assert_eq!(active.overlays, vec![logo]);

    let invocations = h.encoder_invocations();
    assert_eq!(invocations.len(), 4);
    for args in &invocations {
        assert!(args.contains("-i /assets/logo.png"));
        assert!(args.contains("scale=iw*50/100:ih*50/100"));
        assert!(args.contains("overlay=10:20"));
        assert!(!args.contains("hidden.png"));
    }

    h.manager.disconnect("branded").await.unwrap();
}

#[tokio::test]
async fn test_overlay_management_requires_owner() {
    let h = Harness::new(&[], None);
    h.scheduled_stream("owned", vec![]);

    let err = h
        .manager
        .add_overlay("owned", "intruder", Overlay::new("a.png", 0, 0, 100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    let err = h
        .manager
        .add_overlay("owned", "owner", Overlay::new("a.png", 5000, 0, 100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let overlay = h
        .manager
        .add_overlay("owned", "owner", Overlay::new("a.png", 0, 0, 100))
        .await
        .unwrap();
    let updated = h
        .manager
        .update_overlay(
            "owned",
            "owner",
            &overlay.id,
            OverlayUpdate {
                position_x: Some(100),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.position_x, 100);

    assert!(matches!(
        h.manager.remove_overlay("owned", "owner", "missing").await,
        Err(Error::NotFound(_))
    ));
    h.manager
        .remove_overlay("owned", "owner", &overlay.id)
        .await
        .unwrap();
    assert!(h.record("owned").await.overlays.is_empty());
}

#[tokio::test]
async fn test_transition_rules_and_viewer_counts() {
    let h = Harness::new(&[], None);

    assert!(matches!(
        h.manager.connect("unknown").await,
        Err(Error::NotFound(_))
    ));

    let mut created = StreamRecord::new("owner", "Draft");
    created.stream_key = "draft".to_string();
    h.repository.insert(created);
    assert!(matches!(
        h.manager.connect("draft").await,
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(
        h.manager.update_viewer_count("draft", 3).await,
        Err(Error::InvalidState(_))
    ));

    h.manager.schedule("draft").await.unwrap();
    assert!(matches!(
        h.manager.schedule("draft").await,
        Err(Error::InvalidState(_))
    ));
    h.manager.connect("draft").await.unwrap();

    assert_eq!(h.manager.update_viewer_count("draft", -5).await.unwrap(), 0);
    assert_eq!(h.manager.update_viewer_count("draft", 12).await.unwrap(), 12);
    assert_eq!(h.manager.update_viewer_count("draft", 12).await.unwrap(), 12);
    assert_eq!(h.manager.update_viewer_count("draft", 4).await.unwrap(), 4);

    let live = h.manager.active_stream("draft").unwrap();
    assert_eq!(live.viewer_count, 4);
    assert_eq!(live.peak_viewer_count, 12);

    let ended = h.manager.disconnect("draft").await.unwrap();
    assert_eq!(ended.peak_viewer_count, 12);
    assert!(matches!(
        h.manager.connect("draft").await,
        Err(Error::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_disconnect_closes_chat_and_signaling() {
    let h = Harness::new(&[], None);
    h.scheduled_stream("rooms", vec![]);
    h.manager.connect("rooms").await.unwrap();

    let mut chat = h
        .manager
        .chat()
        .join("rooms", ChatUser::new("u1", "alice"))
        .unwrap();
    let mut peer = h.manager.signaling().join("rooms", "p1").unwrap();

    h.manager.disconnect("rooms").await.unwrap();

    let notice = chat.receiver.recv().await.unwrap();
    assert_eq!(notice.kind, ChatEventKind::System);
    assert_eq!(notice.message, "Stream has ended");
    assert!(chat.receiver.recv().await.is_none());
    assert!(peer.recv().await.is_none());
}

#[tokio::test]
async fn test_list_active_filters_by_owner_and_shutdown_ends_all() {
    let h = Harness::new(&[], None);
    h.scheduled_stream("mine", vec![]);
    let mut other = StreamRecord::new("someone-else", "Other")
        .with_status(StreamStatus::Scheduled);
    other.id = "theirs".to_string();
    other.stream_key = "theirs".to_string();
    h.repository.insert(other);

    h.manager.connect("mine").await.unwrap();
    h.manager.connect("theirs").await.unwrap();

    assert_eq!(h.manager.list_active(None).len(), 2);
    let mine = h.manager.list_active(Some("owner"));
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].stream_id, "mine");

    assert_eq!(h.manager.shutdown().await, 2);
    assert!(h.manager.list_active(None).is_empty());
    assert_eq!(h.tracker.live(), 0);
    assert_eq!(h.record("theirs").await.status, StreamStatus::Ended);
}

#[tokio::test]
async fn test_abandoned_connect_still_settles() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::with_encoder(dir, STALLED_FFMPEG, 1_000, None);
    h.scheduled_stream("k1", vec![]);

    // The ingest hook gives up long before the readiness window closes
    let attempt = tokio::time::timeout(Duration::from_millis(300), h.manager.connect("k1")).await;
    assert!(attempt.is_err());

    // Disconnect waits for the start to settle, then tears it down
    let ended = h.manager.disconnect("k1").await.unwrap();
    assert_eq!(ended.status, StreamStatus::Ended);
    assert_eq!(h.record("k1").await.status, StreamStatus::Ended);
    assert!(!h.manager.is_live("k1"));
    assert!(!h.stream_dir("k1").exists());
    assert_eq!(h.tracker.live(), 0);
}

#[tokio::test]
async fn test_abandoned_connect_can_be_retried() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::with_encoder(dir, STALLED_FFMPEG, 1_000, None);
    h.scheduled_stream("k2", vec![]);

    let attempt = tokio::time::timeout(Duration::from_millis(300), h.manager.connect("k2")).await;
    assert!(attempt.is_err());

    // The retry queues behind the first start and finds the stream live
    assert!(matches!(
        h.manager.connect("k2").await,
        Err(Error::AlreadyLive(_))
    ));
    assert!(h.manager.is_live("k2"));
    assert_eq!(h.tracker.live(), 4);

    h.manager.disconnect("k2").await.unwrap();
    assert_eq!(h.tracker.live(), 0);
}

#[tokio::test]
async fn test_failed_save_on_disconnect_keeps_stream_live() {
    let h = Harness::new(&[], None);
    h.scheduled_stream("sticky", vec![]);
    h.manager.connect("sticky").await.unwrap();

    h.repository.fail_saves(true);
    let err = h.manager.disconnect("sticky").await.unwrap_err();
    assert!(matches!(err, Error::Internal(_)));

    // Still live and still encoding, so the disconnect can be retried
    assert!(h.manager.is_live("sticky"));
    assert_eq!(h.tracker.live(), 4);
    assert_eq!(h.record("sticky").await.status, StreamStatus::Live);

    h.repository.fail_saves(false);
    let ended = h.manager.disconnect("sticky").await.unwrap();
    assert_eq!(ended.status, StreamStatus::Ended);
    assert_eq!(h.tracker.live(), 0);
    assert!(!h.stream_dir("sticky").exists());
}

#[tokio::test]
async fn test_stale_live_record_can_go_live_again() {
    let h = Harness::new(&[], None);
    let mut stale = StreamRecord::new("owner", "Crashed").with_status(StreamStatus::Live);
    stale.id = "stale".to_string();
    stale.stream_key = "stale".to_string();
    h.repository.insert(stale);
    assert!(!h.manager.is_live("stale"));

    let active = h.manager.connect("stale").await.unwrap();
    assert_eq!(active.status, StreamStatus::Live);
    assert_eq!(h.tracker.live(), 4);

    h.manager.disconnect("stale").await.unwrap();
    assert_eq!(h.record("stale").await.status, StreamStatus::Ended);
}

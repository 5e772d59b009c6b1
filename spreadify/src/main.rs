mod auth;
mod error;
mod server;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use spreadify_core::{
    bootstrap::load_config,
    logging,
    repository::{MemoryBlockList, MemoryChatStore, MemoryCredentialStore, MemoryStreamRepository},
    service::{ChatRegistry, SignalingRegistry},
};
use spreadify_livestream::{
    relay::http_client, OAuthRefresher, ProcessTracker, RelaySupervisor, StreamManager,
    TranscodeEngine,
};

use server::{AppState, SpreadifyServer};

#[derive(Parser, Debug)]
#[command(name = "spreadify")]
#[command(about = "Spreadify live streaming server", long_about = None)]
struct Args {
    /// Config file (YAML or TOML)
    #[arg(short, long, env = "SPREADIFY_CONFIG_PATH")]
    config: Option<String>,

    /// Log level, overrides logging.level
    #[arg(long, env = "SPREADIFY_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = load_config(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Spreadify server starting...");
    info!("HTTP address: {}", config.http_address());
    info!("HLS output: {}", config.transcode.output_dir.display());

    // 3. Collaborators
    let repository = Arc::new(MemoryStreamRepository::new());
    let refresher = OAuthRefresher::new(http_client(config.relay.request_timeout())?, &config.relay);
    let credentials = Arc::new(MemoryCredentialStore::new().with_refresher(Arc::new(refresher)));

    // 4. Media pipeline
    let tracker = ProcessTracker::new();
    let engine = TranscodeEngine::new(config.transcode.clone(), tracker.clone())?;
    info!(renditions = engine.ladder().len(), "Transcoding engine ready");
    let relays = Arc::new(RelaySupervisor::new(&config.relay, credentials, tracker.clone())?);

    // 5. Rooms and lifecycle
    let chat = ChatRegistry::new(
        &config.chat,
        Arc::new(MemoryChatStore::new()),
        Arc::new(MemoryBlockList::new()),
    );
    chat.spawn_pruner();
    let manager = Arc::new(StreamManager::new(
        repository.clone(),
        engine,
        relays,
        SignalingRegistry::new(),
        chat,
        config.ingest.clone(),
    ));

    let state = AppState {
        manager,
        repository,
        tracker,
        signaling_ping: Duration::from_secs(config.signaling.ping_interval_seconds),
    };

    SpreadifyServer::new(config, state).run().await
}

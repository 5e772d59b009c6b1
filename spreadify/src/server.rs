//! Spreadify HTTP server
//!
//! Thin axum surface over the stream manager:
//! - ingest hooks called by the media server when a feed connects or drops
//! - stream records, scheduling, viewer counts and overlays
//! - signaling and chat WebSockets, chat commands, blocks and signaling peers
//! - HLS playback files under `/live`

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use spreadify_core::{
    models::{ChatCommand, Overlay, OverlayUpdate, Platform, StreamRecord},
    repository::StreamRepository,
    Config, Error,
};
use spreadify_livestream::{ActiveStream, ProcessTracker, StreamManager};

use crate::auth::ProxyUser;
use crate::error::AppResult;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<StreamManager>,
    pub repository: Arc<dyn StreamRepository>,
    pub tracker: ProcessTracker,
    pub signaling_ping: Duration,
}

pub fn create_router(state: AppState, playback_root: PathBuf) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ingest/connect", post(ingest_connect))
        .route("/ingest/disconnect", post(ingest_disconnect))
        .route("/streams", post(create_stream))
        .route("/streams/active", get(list_active))
        .route("/streams/{key}/schedule", post(schedule_stream))
        .route("/streams/{key}/viewers", post(update_viewers))
        .route("/streams/{key}/overlays", post(add_overlay))
        .route(
            "/streams/{key}/overlays/{overlay_id}",
            patch(update_overlay).delete(remove_overlay),
        )
        .route("/chat/commands", get(list_commands).post(register_command))
        .route("/chat/commands/{name}", delete(remove_command))
        .route("/chat/{stream_id}/block", post(block_user))
        .route("/chat/{stream_id}/unblock", post(unblock_user))
        .route("/signal/{stream_id}/peers", get(signaling_peers))
        .route("/ws/signal/{stream_id}/{peer_id}", get(ws::signaling_handler))
        .route("/ws/chat/{stream_id}", get(ws::chat_handler))
        .nest_service("/live", ServeDir::new(playback_root))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    live_streams: usize,
    processes: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        live_streams: state.manager.list_active(None).len(),
        processes: state.tracker.live(),
    })
}

/// Body of the media server's publish callbacks
#[derive(Debug, Deserialize)]
struct IngestHook {
    stream_key: String,
}

async fn ingest_connect(
    State(state): State<AppState>,
    Json(hook): Json<IngestHook>,
) -> AppResult<Json<ActiveStream>> {
    Ok(Json(state.manager.connect(&hook.stream_key).await?))
}

async fn ingest_disconnect(
    State(state): State<AppState>,
    Json(hook): Json<IngestHook>,
) -> AppResult<Json<StreamRecord>> {
    Ok(Json(state.manager.disconnect(&hook.stream_key).await?))
}

#[derive(Debug, Deserialize)]
struct CreateStream {
    owner_id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    platforms: Vec<Platform>,
}

async fn create_stream(
    State(state): State<AppState>,
    Json(body): Json<CreateStream>,
) -> AppResult<(StatusCode, Json<StreamRecord>)> {
    if body.owner_id.trim().is_empty() || body.title.trim().is_empty() {
        return Err(Error::InvalidInput("owner_id and title are required".to_string()).into());
    }

    let mut record = StreamRecord::new(&body.owner_id, body.title.trim()).with_platforms(body.platforms);
    record.description = body.description;
    state.repository.save(&record).await?;
    info!(stream_id = %record.id, owner_id = %record.owner_id, "Stream created");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn schedule_stream(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<StreamRecord>> {
    Ok(Json(state.manager.schedule(&key).await?))
}

#[derive(Debug, Deserialize)]
struct OwnerFilter {
    owner_id: Option<String>,
}

async fn list_active(
    State(state): State<AppState>,
    Query(filter): Query<OwnerFilter>,
) -> Json<Vec<ActiveStream>> {
    Json(state.manager.list_active(filter.owner_id.as_deref()))
}

#[derive(Debug, Deserialize)]
struct ViewerCount {
    count: i64,
}

#[derive(Debug, Serialize)]
struct ViewerCountResponse {
    viewer_count: u32,
}

async fn update_viewers(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<ViewerCount>,
) -> AppResult<Json<ViewerCountResponse>> {
    let viewer_count = state.manager.update_viewer_count(&key, body.count).await?;
    Ok(Json(ViewerCountResponse { viewer_count }))
}

#[derive(Debug, Deserialize)]
struct Owner {
    owner_id: String,
}

const fn default_scale() -> u32 {
    100
}

#[derive(Debug, Deserialize)]
struct NewOverlay {
    image_path: PathBuf,
    position_x: u32,
    position_y: u32,
    #[serde(default = "default_scale")]
    scale: u32,
}

async fn add_overlay(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(owner): Query<Owner>,
    Json(body): Json<NewOverlay>,
) -> AppResult<(StatusCode, Json<Overlay>)> {
    let overlay = Overlay::new(body.image_path, body.position_x, body.position_y, body.scale);
    let overlay = state.manager.add_overlay(&key, &owner.owner_id, overlay).await?;
    Ok((StatusCode::CREATED, Json(overlay)))
}

async fn update_overlay(
    State(state): State<AppState>,
    Path((key, overlay_id)): Path<(String, String)>,
    Query(owner): Query<Owner>,
    Json(update): Json<OverlayUpdate>,
) -> AppResult<Json<Overlay>> {
    Ok(Json(
        state
            .manager
            .update_overlay(&key, &owner.owner_id, &overlay_id, update)
            .await?,
    ))
}

async fn remove_overlay(
    State(state): State<AppState>,
    Path((key, overlay_id)): Path<(String, String)>,
    Query(owner): Query<Owner>,
) -> AppResult<Json<Overlay>> {
    Ok(Json(
        state
            .manager
            .remove_overlay(&key, &owner.owner_id, &overlay_id)
            .await?,
    ))
}

async fn list_commands(State(state): State<AppState>) -> Json<Vec<ChatCommand>> {
    Json(state.manager.chat().commands())
}

#[derive(Debug, Deserialize)]
struct NewCommand {
    name: String,
    response: String,
}

async fn register_command(
    State(state): State<AppState>,
    user: ProxyUser,
    Json(body): Json<NewCommand>,
) -> AppResult<(StatusCode, Json<ChatCommand>)> {
    let command = state
        .manager
        .chat()
        .register_command(&user.chat_user(), &body.name, &body.response)?;
    Ok((StatusCode::CREATED, Json(command)))
}

async fn remove_command(
    State(state): State<AppState>,
    user: ProxyUser,
    Path(name): Path<String>,
) -> AppResult<Json<ChatCommand>> {
    Ok(Json(
        state.manager.chat().remove_command(&user.chat_user(), &name)?,
    ))
}

async fn find_stream(state: &AppState, stream_id: &str) -> AppResult<StreamRecord> {
    state
        .repository
        .find_by_id(stream_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Stream {stream_id}")).into())
}

#[derive(Debug, Deserialize)]
struct BlockRequest {
    blocked_user_id: String,
}

#[derive(Debug, Serialize)]
struct BlockResponse {
    blocked_user_id: String,
    blocked: bool,
}

async fn block_user(
    State(state): State<AppState>,
    user: ProxyUser,
    Path(stream_id): Path<String>,
    Json(body): Json<BlockRequest>,
) -> AppResult<Json<BlockResponse>> {
    find_stream(&state, &stream_id).await?;
    if body.blocked_user_id.trim().is_empty() || body.blocked_user_id == user.user_id {
        return Err(Error::InvalidInput("Cannot block that user".to_string()).into());
    }

    state.manager.chat().block(&user.user_id, &body.blocked_user_id).await?;
    info!(stream_id = %stream_id, user_id = %user.user_id, blocked = %body.blocked_user_id, "User blocked");
    Ok(Json(BlockResponse {
        blocked_user_id: body.blocked_user_id,
        blocked: true,
    }))
}

#[derive(Debug, Serialize)]
struct UnblockResponse {
    blocked_user_id: String,
    /// False when there was no block to remove
    removed: bool,
}

async fn unblock_user(
    State(state): State<AppState>,
    user: ProxyUser,
    Path(stream_id): Path<String>,
    Json(body): Json<BlockRequest>,
) -> AppResult<Json<UnblockResponse>> {
    find_stream(&state, &stream_id).await?;
    let removed = state
        .manager
        .chat()
        .unblock(&user.user_id, &body.blocked_user_id)
        .await?;
    if removed {
        info!(stream_id = %stream_id, user_id = %user.user_id, unblocked = %body.blocked_user_id, "User unblocked");
    }
    Ok(Json(UnblockResponse {
        blocked_user_id: body.blocked_user_id,
        removed,
    }))
}

#[derive(Debug, Serialize)]
struct PeersResponse {
    stream_id: String,
    peers: Vec<String>,
    count: usize,
}

/// Connected signaling peers. Stream owners only.
async fn signaling_peers(
    State(state): State<AppState>,
    user: ProxyUser,
    Path(stream_id): Path<String>,
) -> AppResult<Json<PeersResponse>> {
    let stream = find_stream(&state, &stream_id).await?;
    if stream.owner_id != user.user_id {
        return Err(Error::Forbidden("Not authorized to view stream peers".to_string()).into());
    }

    let peers = state.manager.signaling().peers(&stream_id);
    Ok(Json(PeersResponse {
        stream_id,
        count: peers.len(),
        peers,
    }))
}

/// Spreadify server: the HTTP surface plus orderly teardown of live streams
pub struct SpreadifyServer {
    config: Config,
    state: AppState,
}

impl SpreadifyServer {
    pub const fn new(config: Config, state: AppState) -> Self {
        Self { config, state }
    }

    /// Serve until a shutdown signal, then end every live stream
    pub async fn run(self) -> anyhow::Result<()> {
        let address = self.config.http_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {address}: {e}"))?;
        info!("HTTP server listening on {address}");

        let router = create_router(self.state.clone(), self.config.transcode.output_dir.clone());
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            error!("HTTP server error: {e}");
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        info!("Shutting down Spreadify server...");
        let ended = self.state.manager.shutdown().await;
        if ended > 0 {
            info!(streams = ended, "Live streams ended");
        }

        let leftover = self.state.tracker.live();
        if leftover > 0 {
            warn!(processes = leftover, "Supervised processes still running at exit");
        }
        info!("Spreadify server stopped");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

//! WebSocket endpoints for signaling and chat
//!
//! Each socket is split into a reader loop and a writer task. The writer
//! merges room traffic from the registry with notices addressed to this
//! socket only (parse errors, relay rejections, keepalive pings).

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use spreadify_core::models::{ChatEvent, ChatUser, InboundChat, SignalingKind, SignalingMessage};
use spreadify_core::service::ChatConnection;

use crate::server::AppState;

/// Signaling and chat frames are small
const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Forward `inbound` and `local` to the socket until either source closes.
/// With `idle` set, its frame is sent whenever nothing was written for that long.
fn spawn_writer<T>(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut inbound: mpsc::UnboundedReceiver<T>,
    mut local: mpsc::UnboundedReceiver<T>,
    idle: Option<(Duration, fn() -> T)>,
) -> tokio::task::JoinHandle<()>
where
    T: Serialize + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let idle_timer = async {
                match idle {
                    Some((after, _)) => tokio::time::sleep(after).await,
                    None => std::future::pending().await,
                }
            };
            let frame = tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                message = local.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                () = idle_timer => match idle {
                    Some((_, make)) => make(),
                    None => continue,
                },
            };

            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    })
}

/// Send one notice and close. Used when a socket is refused after the upgrade.
async fn refuse<T: Serialize>(mut socket: WebSocket, notice: &T) {
    if let Ok(text) = serde_json::to_string(notice) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket.close().await;
}

pub async fn signaling_handler(
    State(state): State<AppState>,
    Path((stream_id, peer_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| signaling_session(socket, state, stream_id, peer_id))
}

async fn signaling_session(socket: WebSocket, state: AppState, stream_id: String, peer_id: String) {
    // Joined only once the socket is up, so every peer_joined is followed by a peer_left
    let inbound = match state.manager.signaling().join(&stream_id, &peer_id) {
        Ok(inbound) => inbound,
        Err(e) => {
            debug!(stream_id = %stream_id, peer_id = %peer_id, error = %e, "Signaling join refused");
            refuse(socket, &SignalingMessage::error(e.to_string())).await;
            return;
        }
    };
    info!(stream_id = %stream_id, peer_id = %peer_id, "Signaling socket connected");

    let (sink, mut stream) = socket.split();
    let (notices, local) = mpsc::unbounded_channel();
    let writer = spawn_writer(
        sink,
        inbound,
        local,
        Some((
            state.signaling_ping,
            SignalingMessage::ping as fn() -> SignalingMessage,
        )),
    );

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => match serde_json::from_str::<SignalingMessage>(text.as_str()) {
                Ok(message) if message.kind == SignalingKind::Ping => {}
                Ok(message) => {
                    if let Err(e) = state.manager.signaling().relay(&stream_id, &peer_id, message) {
                        let _ = notices.send(SignalingMessage::error(e.to_string()));
                    }
                }
                Err(e) => {
                    let _ = notices.send(SignalingMessage::error(format!("Invalid message: {e}")));
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.manager.signaling().leave(&stream_id, &peer_id);
    writer.abort();
    info!(stream_id = %stream_id, peer_id = %peer_id, "Signaling socket closed");
}

/// Identity of a chat participant, as established by the fronting proxy
#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub user_id: String,
    pub username: String,
}

pub async fn chat_handler(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
    Query(query): Query<ChatQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| chat_session(socket, state, stream_id, query))
}

async fn chat_session(socket: WebSocket, state: AppState, stream_id: String, query: ChatQuery) {
    let user = ChatUser::new(&query.user_id, &query.username);
    let connection = match state.manager.chat().join(&stream_id, user) {
        Ok(connection) => connection,
        Err(e) => {
            debug!(stream_id = %stream_id, user_id = %query.user_id, error = %e, "Chat join refused");
            refuse(socket, &ChatEvent::error(e.code(), e.to_string())).await;
            return;
        }
    };
    let ChatConnection {
        connection_id,
        receiver,
    } = connection;
    info!(stream_id = %stream_id, connection_id = %connection_id, "Chat socket connected");

    let (sink, mut stream) = socket.split();
    let (notices, local) = mpsc::unbounded_channel();
    let writer = spawn_writer(sink, receiver, local, None);

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => match serde_json::from_str::<InboundChat>(text.as_str()) {
                Ok(inbound) => {
                    // Rejections already reached the sender as error events
                    if let Err(e) = state
                        .manager
                        .chat()
                        .handle_message(&stream_id, &connection_id, &inbound.message)
                        .await
                    {
                        debug!(stream_id = %stream_id, connection_id = %connection_id, error = %e, "Chat message not delivered");
                    }
                }
                Err(e) => {
                    let _ = notices.send(ChatEvent::error("invalid", format!("Invalid message: {e}")));
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.manager.chat().leave(&stream_id, &connection_id);
    writer.abort();
    info!(stream_id = %stream_id, connection_id = %connection_id, "Chat socket closed");
}

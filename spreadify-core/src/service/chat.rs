//! Chat room registry
//!
//! One room per stream id. Messages pass the content filter, then the
//! per-user rate limiter, then either resolve as a `!command` (answered to
//! the sender only) or are stored and broadcast to every participant who has
//! not blocked the sender.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::content_filter::{ContentFilter, ContentFilterError};
use super::rate_limit::SlidingWindowLimiter;
use crate::{
    config::ChatConfig,
    models::{
        chat::normalize_command_name, generate_id, ChatCommand, ChatEvent, ChatMessage, ChatUser,
        ConnectionId,
    },
    repository::{BlockList, ChatStore},
    Error, Result,
};

pub type ChatSender = mpsc::UnboundedSender<ChatEvent>;
pub type ChatReceiver = mpsc::UnboundedReceiver<ChatEvent>;

const UPTIME_PLACEHOLDER: &str = "{uptime}";

#[derive(Debug, Clone)]
struct Participant {
    connection_id: ConnectionId,
    user: ChatUser,
    sender: ChatSender,
}

/// A participant's handle on a chat room
#[derive(Debug)]
pub struct ChatConnection {
    pub connection_id: ConnectionId,
    pub receiver: ChatReceiver,
}

/// What happened to an accepted inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOutcome {
    /// Stored and delivered to this many participants
    Broadcast { delivered: usize },
    /// Answered by a command, to the sender only
    Command,
}

#[must_use]
pub fn default_commands() -> Vec<ChatCommand> {
    vec![
        ChatCommand::new("!help", "Available commands: !help, !uptime"),
        ChatCommand::new("!uptime", "Stream uptime: {uptime}"),
    ]
}

/// Registry of per-stream chat rooms
#[derive(Clone)]
pub struct ChatRegistry {
    rooms: Arc<DashMap<String, Vec<Participant>>>,
    /// When each live stream started, for `{uptime}`
    started_at: Arc<DashMap<String, DateTime<Utc>>>,
    commands: Arc<DashMap<String, ChatCommand>>,
    limiter: SlidingWindowLimiter,
    filter: ContentFilter,
    store: Arc<dyn ChatStore>,
    blocks: Arc<dyn BlockList>,
}

impl ChatRegistry {
    pub fn new(config: &ChatConfig, store: Arc<dyn ChatStore>, blocks: Arc<dyn BlockList>) -> Self {
        let commands = DashMap::new();
        for command in default_commands() {
            commands.insert(command.name.clone(), command);
        }

        Self {
            rooms: Arc::new(DashMap::new()),
            started_at: Arc::new(DashMap::new()),
            commands: Arc::new(commands),
            limiter: SlidingWindowLimiter::new(
                config.rate_limit_messages,
                Duration::from_secs(config.rate_limit_window_seconds),
            ),
            filter: ContentFilter::new(config.max_message_length),
            store,
            blocks,
        }
    }

    /// Mark a stream's chat as live from `started_at`
    pub fn open_room(&self, stream_id: &str, started_at: DateTime<Utc>) {
        self.started_at.insert(stream_id.to_string(), started_at);
        debug!(stream_id = %stream_id, "Chat room opened");
    }

    /// End a stream's chat: participants get a final notice and are dropped.
    pub fn close_room(&self, stream_id: &str) -> usize {
        self.started_at.remove(stream_id);
        let Some((_, participants)) = self.rooms.remove(stream_id) else {
            return 0;
        };

        let notice = ChatEvent::system("Stream has ended".to_string());
        for participant in &participants {
            let _ = participant.sender.send(notice.clone());
        }
        for participant in &participants {
            self.forget_if_disconnected(&participant.user.user_id);
        }

        info!(stream_id = %stream_id, participants = participants.len(), "Chat room closed");
        participants.len()
    }

    pub fn join(&self, stream_id: &str, user: ChatUser) -> Result<ChatConnection> {
        if stream_id.is_empty() || user.user_id.is_empty() {
            return Err(Error::InvalidInput(
                "stream id and user id must not be empty".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = generate_id();

        info!(
            stream_id = %stream_id,
            user_id = %user.user_id,
            connection_id = %connection_id,
            "Participant joined chat"
        );

        self.rooms
            .entry(stream_id.to_string())
            .or_default()
            .push(Participant {
                connection_id: connection_id.clone(),
                user,
                sender: tx,
            });

        Ok(ChatConnection {
            connection_id,
            receiver: rx,
        })
    }

    /// Remove a connection and tell the rest of the room. Returns false if
    /// the connection was not in the room.
    pub fn leave(&self, stream_id: &str, connection_id: &str) -> bool {
        let (user, remaining) = {
            let Some(mut room) = self.rooms.get_mut(stream_id) else {
                return false;
            };
            let Some(index) = room.iter().position(|p| p.connection_id == connection_id) else {
                return false;
            };
            let participant = room.remove(index);
            (participant.user, room.clone())
        };
        self.rooms.remove_if(stream_id, |_, room| room.is_empty());
        self.forget_if_disconnected(&user.user_id);

        info!(
            stream_id = %stream_id,
            user_id = %user.user_id,
            connection_id = %connection_id,
            "Participant left chat"
        );

        let notice = ChatEvent::system(format!("{} left the chat", user.username));
        self.deliver(stream_id, &remaining, &notice);
        true
    }

    /// Process one inbound message from a connection.
    ///
    /// Rejections are reported to the sender as `error` events and returned.
    pub async fn handle_message(
        &self,
        stream_id: &str,
        connection_id: &str,
        text: &str,
    ) -> Result<ChatOutcome> {
        let sender = self
            .participant(stream_id, connection_id)
            .ok_or_else(|| Error::NotFound(format!("Chat connection {connection_id}")))?;

        let message = match self.filter.filter_chat(text) {
            Ok(message) => message,
            Err(e) => {
                let (code, notice) = match e {
                    ContentFilterError::Spam { .. } => {
                        ("rejected", "Your message was flagged as spam".to_string())
                    }
                    ref other => ("invalid", other.to_string()),
                };
                let _ = sender.sender.send(ChatEvent::error(code, notice));
                debug!(stream_id = %stream_id, user_id = %sender.user.user_id, error = %e, "Chat message rejected");
                return Err(e.into());
            }
        };

        if let Err(e) = self.limiter.check(&sender.user.user_id) {
            let err: Error = e.into();
            let _ = sender
                .sender
                .send(ChatEvent::error("rate_limited", err.to_string()));
            debug!(stream_id = %stream_id, user_id = %sender.user.user_id, "Chat message rate limited");
            return Err(err);
        }

        if let Some(response) = self.command_response(stream_id, message) {
            let _ = sender.sender.send(ChatEvent::command(response));
            return Ok(ChatOutcome::Command);
        }

        let record = ChatMessage::new(stream_id, &sender.user, message);
        if let Err(e) = self.store.store_message(&record).await {
            warn!(stream_id = %stream_id, error = %e, "Failed to store chat message");
        }

        let blockers = self
            .blocks
            .blocked_by(&sender.user.user_id)
            .await
            .unwrap_or_else(|e| {
                warn!(user_id = %sender.user.user_id, error = %e, "Block list lookup failed");
                HashSet::new()
            });

        let recipients: Vec<Participant> = self
            .rooms
            .get(stream_id)
            .map(|room| {
                room.iter()
                    .filter(|p| !blockers.contains(&p.user.user_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let event = ChatEvent::chat(&sender.user, message);
        let delivered = self.deliver(stream_id, &recipients, &event);
        Ok(ChatOutcome::Broadcast { delivered })
    }

    /// Add or replace a command. Moderators only.
    pub fn register_command(
        &self,
        actor: &ChatUser,
        name: &str,
        response: &str,
    ) -> Result<ChatCommand> {
        if !actor.is_moderator {
            return Err(Error::Forbidden(
                "Only moderators can create chat commands".to_string(),
            ));
        }
        let command = ChatCommand::new(name, response.trim());
        if command.name.len() < 2 || command.name.chars().any(char::is_whitespace) {
            return Err(Error::InvalidInput(format!("Invalid command name '{name}'")));
        }
        if command.response.is_empty() {
            return Err(Error::InvalidInput("Command response is empty".to_string()));
        }

        info!(command = %command.name, moderator = %actor.user_id, "Chat command registered");
        self.commands.insert(command.name.clone(), command.clone());
        Ok(command)
    }

    /// Remove a command. Moderators only.
    pub fn remove_command(&self, actor: &ChatUser, name: &str) -> Result<ChatCommand> {
        if !actor.is_moderator {
            return Err(Error::Forbidden(
                "Only moderators can delete chat commands".to_string(),
            ));
        }
        let name = normalize_command_name(name);
        let (_, command) = self
            .commands
            .remove(&name)
            .ok_or_else(|| Error::NotFound(format!("Command {name}")))?;

        info!(command = %name, moderator = %actor.user_id, "Chat command removed");
        Ok(command)
    }

    #[must_use]
    pub fn commands(&self) -> Vec<ChatCommand> {
        let mut commands: Vec<_> = self.commands.iter().map(|c| c.value().clone()).collect();
        commands.sort_by(|a, b| a.name.cmp(&b.name));
        commands
    }

    pub async fn block(&self, blocker_id: &str, blocked_id: &str) -> Result<()> {
        self.blocks.block(blocker_id, blocked_id).await
    }

    pub async fn unblock(&self, blocker_id: &str, blocked_id: &str) -> Result<bool> {
        self.blocks.unblock(blocker_id, blocked_id).await
    }

    #[must_use]
    pub fn participant_count(&self, stream_id: &str) -> usize {
        self.rooms.get(stream_id).map_or(0, |room| room.len())
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Periodically drop rate-limit logs of users who went quiet
    pub fn spawn_pruner(&self) -> tokio::task::JoinHandle<()> {
        self.limiter.spawn_pruner(self.limiter.window())
    }

    fn participant(&self, stream_id: &str, connection_id: &str) -> Option<Participant> {
        self.rooms.get(stream_id).and_then(|room| {
            room.iter()
                .find(|p| p.connection_id == connection_id)
                .cloned()
        })
    }

    fn command_response(&self, stream_id: &str, message: &str) -> Option<String> {
        if !message.starts_with('!') {
            return None;
        }
        let name = message.split_whitespace().next()?;
        let command = self.commands.get(name)?;

        if !command.response.contains(UPTIME_PLACEHOLDER) {
            return Some(command.response.clone());
        }
        Some(match self.started_at.get(stream_id) {
            Some(started_at) => command
                .response
                .replace(UPTIME_PLACEHOLDER, &format_uptime(Utc::now() - *started_at)),
            None => "Stream is not live".to_string(),
        })
    }

    fn deliver(&self, stream_id: &str, recipients: &[Participant], event: &ChatEvent) -> usize {
        let mut sent = 0;
        let mut dead = Vec::new();

        for participant in recipients {
            if participant.sender.send(event.clone()).is_ok() {
                sent += 1;
            } else {
                dead.push(participant.connection_id.clone());
            }
        }

        if !dead.is_empty() {
            debug!(stream_id = %stream_id, dead = ?dead, "Dropping closed chat connections");
            if let Some(mut room) = self.rooms.get_mut(stream_id) {
                room.retain(|p| !dead.contains(&p.connection_id));
            }
            self.rooms.remove_if(stream_id, |_, room| room.is_empty());
        }

        sent
    }

    fn forget_if_disconnected(&self, user_id: &str) {
        let connected = self
            .rooms
            .iter()
            .any(|room| room.iter().any(|p| p.user.user_id == user_id));
        if !connected {
            self.limiter.forget(user_id);
        }
    }
}

/// `H:MM:SS`, hours unbounded
fn format_uptime(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

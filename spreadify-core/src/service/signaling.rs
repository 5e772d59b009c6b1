//! Signaling room registry
//!
//! Routes session negotiation messages (offer/answer/ICE candidates) between
//! the peers connected to a stream. One room per stream id; a room exists
//! only while it has members.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{models::SignalingMessage, Error, Result};

pub type SignalingSender = mpsc::UnboundedSender<SignalingMessage>;
pub type SignalingReceiver = mpsc::UnboundedReceiver<SignalingMessage>;

#[derive(Debug, Clone)]
struct Peer {
    peer_id: String,
    sender: SignalingSender,
}

/// Registry of per-stream signaling rooms
#[derive(Clone, Default)]
pub struct SignalingRegistry {
    /// stream_id -> members in join order
    rooms: Arc<DashMap<String, Vec<Peer>>>,
}

impl SignalingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer to a stream's room and announce it to the existing members.
    ///
    /// Returns the receiving half of the peer's connection.
    pub fn join(&self, stream_id: &str, peer_id: &str) -> Result<SignalingReceiver> {
        if stream_id.is_empty() || peer_id.is_empty() {
            return Err(Error::InvalidInput(
                "stream id and peer id must not be empty".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let existing = {
            let mut room = self.rooms.entry(stream_id.to_string()).or_default();
            room.retain(|p| !p.sender.is_closed());
            if room.iter().any(|p| p.peer_id == peer_id) {
                return Err(Error::InvalidInput(format!(
                    "Peer {peer_id} is already connected to {stream_id}"
                )));
            }
            let existing = room.clone();
            room.push(Peer {
                peer_id: peer_id.to_string(),
                sender: tx,
            });
            existing
        };

        info!(
            stream_id = %stream_id,
            peer_id = %peer_id,
            members = existing.len() + 1,
            "Peer joined signaling room"
        );

        self.deliver(stream_id, &existing, &SignalingMessage::peer_joined(peer_id));
        Ok(rx)
    }

    /// Forward a negotiation message from `peer_id` to every other member.
    ///
    /// The sender id and timestamp are stamped here. Returns how many peers
    /// the message reached.
    pub fn relay(
        &self,
        stream_id: &str,
        peer_id: &str,
        mut message: SignalingMessage,
    ) -> Result<usize> {
        if !message.kind.is_relayable() {
            return Err(Error::InvalidInput(format!(
                "{:?} messages cannot be relayed",
                message.kind
            )));
        }

        let others: Vec<Peer> = {
            let room = self
                .rooms
                .get(stream_id)
                .ok_or_else(|| Error::NotFound(format!("Signaling room {stream_id}")))?;
            if !room.iter().any(|p| p.peer_id == peer_id) {
                return Err(Error::NotFound(format!(
                    "Peer {peer_id} in signaling room {stream_id}"
                )));
            }
            room.iter()
                .filter(|p| p.peer_id != peer_id)
                .cloned()
                .collect()
        };

        message.from = peer_id.to_string();
        message.timestamp = Utc::now();

        Ok(self.deliver(stream_id, &others, &message))
    }

    /// Remove a peer and announce its departure. The room is deleted with
    /// its last member. Returns false if the peer was not a member.
    pub fn leave(&self, stream_id: &str, peer_id: &str) -> bool {
        let remaining = {
            let Some(mut room) = self.rooms.get_mut(stream_id) else {
                return false;
            };
            let before = room.len();
            room.retain(|p| p.peer_id != peer_id);
            if room.len() == before {
                return false;
            }
            room.clone()
        };
        self.rooms.remove_if(stream_id, |_, room| room.is_empty());

        info!(
            stream_id = %stream_id,
            peer_id = %peer_id,
            remaining = remaining.len(),
            "Peer left signaling room"
        );

        self.deliver(stream_id, &remaining, &SignalingMessage::peer_left(peer_id));
        true
    }

    /// Send a server-originated message (ping, error notice) to one peer
    pub fn send_to(&self, stream_id: &str, peer_id: &str, message: SignalingMessage) -> bool {
        let target: Vec<Peer> = self
            .rooms
            .get(stream_id)
            .map(|room| {
                room.iter()
                    .filter(|p| p.peer_id == peer_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        self.deliver(stream_id, &target, &message) > 0
    }

    /// Drop every member of a room. Their receivers end once drained.
    pub fn close_room(&self, stream_id: &str) -> usize {
        let closed = self
            .rooms
            .remove(stream_id)
            .map_or(0, |(_, room)| room.len());
        if closed > 0 {
            info!(stream_id = %stream_id, peers = closed, "Signaling room closed");
        }
        closed
    }

    #[must_use]
    pub fn peer_count(&self, stream_id: &str) -> usize {
        self.rooms.get(stream_id).map_or(0, |room| room.len())
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn peers(&self, stream_id: &str) -> Vec<String> {
        self.rooms
            .get(stream_id)
            .map(|room| room.iter().map(|p| p.peer_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Send to a membership snapshot. Members whose connection is gone are
    /// removed without failing delivery to the rest.
    fn deliver(&self, stream_id: &str, recipients: &[Peer], message: &SignalingMessage) -> usize {
        let mut sent = 0;
        let mut dead = Vec::new();

        for peer in recipients {
            if peer.sender.send(message.clone()).is_ok() {
                sent += 1;
            } else {
                dead.push(peer.peer_id.clone());
            }
        }

        if !dead.is_empty() {
            debug!(stream_id = %stream_id, dead = ?dead, "Dropping closed signaling connections");
            if let Some(mut room) = self.rooms.get_mut(stream_id) {
                room.retain(|p| !(p.sender.is_closed() && dead.contains(&p.peer_id)));
            }
            self.rooms.remove_if(stream_id, |_, room| room.is_empty());
        }

        sent
    }
}

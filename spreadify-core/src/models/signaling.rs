use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a signaling message exchanged within a stream's room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalingKind {
    #[serde(rename = "offer")]
    Offer,
    #[serde(rename = "answer")]
    Answer,
    #[serde(rename = "ice-candidate")]
    IceCandidate,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "peer_joined")]
    PeerJoined,
    #[serde(rename = "peer_left")]
    PeerLeft,
    #[serde(rename = "error")]
    Error,
}

impl SignalingKind {
    /// Only session negotiation messages are forwarded between peers.
    #[must_use]
    pub const fn is_relayable(self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::IceCandidate)
    }
}

/// Signaling message as carried on the wire.
///
/// `from` and `timestamp` are stamped by the server; values sent by a
/// client are overwritten before relaying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: SignalingKind,
    #[serde(default)]
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl SignalingMessage {
    fn notice(kind: SignalingKind, from: &str) -> Self {
        Self {
            kind,
            from: from.to_string(),
            to: None,
            sdp: None,
            candidate: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn peer_joined(peer_id: &str) -> Self {
        Self::notice(SignalingKind::PeerJoined, peer_id)
    }

    #[must_use]
    pub fn peer_left(peer_id: &str) -> Self {
        Self::notice(SignalingKind::PeerLeft, peer_id)
    }

    #[must_use]
    pub fn ping() -> Self {
        Self::notice(SignalingKind::Ping, "server")
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        let mut msg = Self::notice(SignalingKind::Error, "server");
        msg.message = Some(message.into());
        msg
    }
}

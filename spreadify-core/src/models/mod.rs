pub mod chat;
pub mod credential;
pub mod id;
pub mod overlay;
pub mod rendition;
pub mod signaling;
pub mod stream;

pub use chat::{ChatCommand, ChatEvent, ChatEventKind, ChatMessage, ChatUser, InboundChat};
pub use credential::{DestinationCredential, Platform, TokenGrant};
pub use id::{generate_id, generate_stream_key, ConnectionId};
pub use overlay::{Overlay, OverlayUpdate};
pub use rendition::{EncodingStatus, Rendition};
pub use signaling::{SignalingKind, SignalingMessage};
pub use stream::{StreamRecord, StreamStatus};

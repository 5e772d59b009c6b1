use nanoid::nanoid;

/// Generate a 12-character nanoid for entity IDs
#[must_use]
pub fn generate_id() -> String {
    nanoid!(12)
}

/// Generate a broadcaster stream key.
///
/// Keys are credentials, so they are longer than entity IDs.
#[must_use]
pub fn generate_stream_key() -> String {
    nanoid!(24)
}

/// Identifier of one client connection (websocket) within a room
pub type ConnectionId = String;

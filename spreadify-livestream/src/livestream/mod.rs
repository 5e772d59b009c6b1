//! Stream lifecycle: going live, relaying, ending

pub mod active_stream;
pub mod events;
pub mod manager;

pub use active_stream::{ActiveStream, RelayStatus};
pub use events::LifecycleEvent;
pub use manager::StreamManager;

//! Adaptive-bitrate HLS transcoding
//!
//! - `ladder`: the renditions every stream is encoded into
//! - `probe`: source audio detection
//! - `command`: ffmpeg arguments per rendition (scaling, overlays, HLS output)
//! - `manifest`: the master playlist
//! - `engine`: per-stream encoder supervision

pub mod command;
pub mod engine;
pub mod ladder;
pub mod manifest;
pub mod probe;

pub use engine::{RenditionReport, TranscodeEngine, TranscodeSession};
pub use ladder::{default_ladder, QualityLadder};
pub use manifest::{master_playlist, MASTER_PLAYLIST, RENDITION_PLAYLIST};

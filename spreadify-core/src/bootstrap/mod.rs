//! Bootstrap helpers for the Spreadify server
//!
//! Configuration discovery lives here so the binary stays a thin wiring layer.

pub mod config;

pub use config::{load_config, resolve_config_path};

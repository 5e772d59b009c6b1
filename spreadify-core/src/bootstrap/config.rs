//! Configuration loading

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::Config;

const CWD_CONFIG: &str = "config.yaml";
const MOUNTED_CONFIG: &str = "/config/config.yaml";

/// Pick the config file to load
///
/// Search order:
/// 1. explicit path (from the command line)
/// 2. `SPREADIFY_CONFIG_PATH` environment variable
/// 3. ./config.yaml (current working directory)
/// 4. /config/config.yaml (container mount path)
#[must_use]
pub fn resolve_config_path(explicit: Option<&str>) -> Option<String> {
    explicit
        .map(ToString::to_string)
        .or_else(|| std::env::var("SPREADIFY_CONFIG_PATH").ok())
        .filter(|p| Path::new(p).exists())
        .or_else(|| {
            [CWD_CONFIG, MOUNTED_CONFIG]
                .into_iter()
                .find(|p| Path::new(p).exists())
                .map(ToString::to_string)
        })
}

/// Load and validate configuration, falling back to environment variables
/// and defaults when no file is present.
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    let config = if let Some(path) = resolve_config_path(explicit) {
        eprintln!("Loading config from {path}");
        Config::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env().unwrap_or_else(|e| {
            eprintln!("Failed to load config: {e}");
            eprintln!("Using default configuration");
            Config::default()
        })
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    info!("Configuration loaded and validated successfully");
    Ok(config)
}

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::rendition::Rendition;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub ingest: IngestConfig,
    pub transcode: TranscodeConfig,
    pub relay: RelayConfig,
    pub chat: ChatConfig,
    pub signaling: SignalingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json", "pretty" or "compact"
    pub file_path: Option<String>,
    /// Per-target levels, e.g. `spreadify_livestream::process: debug`
    pub targets: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
            targets: BTreeMap::new(),
        }
    }
}

/// Where the ingest server exposes incoming feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Feeds are read from `<base_url>/<stream_key>`
    pub base_url: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_url: "rtmp://127.0.0.1:1935/live".to_string(),
        }
    }
}

impl IngestConfig {
    #[must_use]
    pub fn feed_url(&self, stream_key: &str) -> String {
        format!("{}/{stream_key}", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Root directory for HLS output, one sub-directory per stream
    pub output_dir: PathBuf,
    pub segment_seconds: u32,
    pub playlist_size: u32,
    pub probe_timeout_ms: u64,
    pub ready_timeout_ms: u64,
    pub stop_grace_ms: u64,
    /// Overrides the built-in quality ladder when non-empty
    pub ladder: Vec<Rendition>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            output_dir: PathBuf::from("uploads/streams"),
            segment_seconds: 4,
            playlist_size: 6,
            probe_timeout_ms: 5_000,
            ready_timeout_ms: 10_000,
            stop_grace_ms: 5_000,
            ladder: Vec::new(),
        }
    }
}

impl TranscodeConfig {
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Remote API endpoints and OAuth client for one destination platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformApiConfig {
    pub api_base: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl PlatformApiConfig {
    fn new(api_base: &str, token_url: &str) -> Self {
        Self {
            api_base: api_base.to_string(),
            token_url: token_url.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub ffmpeg_path: String,
    pub stop_grace_ms: u64,
    /// Credentials expiring within this window are refreshed before use
    pub refresh_skew_seconds: i64,
    pub request_timeout_seconds: u64,
    pub youtube: PlatformApiConfig,
    pub twitch: PlatformApiConfig,
    pub facebook: PlatformApiConfig,
    pub linkedin: PlatformApiConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            stop_grace_ms: 5_000,
            refresh_skew_seconds: 60,
            request_timeout_seconds: 15,
            youtube: PlatformApiConfig::new(
                "https://www.googleapis.com/youtube/v3",
                "https://oauth2.googleapis.com/token",
            ),
            twitch: PlatformApiConfig::new(
                "https://api.twitch.tv/helix",
                "https://id.twitch.tv/oauth2/token",
            ),
            facebook: PlatformApiConfig::new(
                "https://graph.facebook.com/v18.0",
                "https://graph.facebook.com/v18.0/oauth/access_token",
            ),
            linkedin: PlatformApiConfig::new(
                "https://api.linkedin.com/v2",
                "https://www.linkedin.com/oauth/v2/accessToken",
            ),
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Accepted messages per participant per window
    pub rate_limit_messages: usize,
    pub rate_limit_window_seconds: u64,
    pub max_message_length: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            rate_limit_messages: 3,
            rate_limit_window_seconds: 5,
            max_message_length: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Idle time after which the server pings a signaling peer
    pub ping_interval_seconds: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ping_interval_seconds: 30,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // SPREADIFY_SERVER__HTTP_PORT, SPREADIFY_CHAT__RATE_LIMIT_MESSAGES, ...
        builder = builder.add_source(
            Environment::with_prefix("SPREADIFY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check for misconfigurations, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("logging.level '{}' is not valid", self.logging.level));
        } else if let Err(e) = crate::logging::filter_directives(&self.logging) {
            errors.push(e.to_string());
        }
        if let Err(e) = self.logging.format.parse::<crate::logging::LogFormat>() {
            errors.push(format!("logging.format: {e}"));
        }
        if self.transcode.segment_seconds == 0 {
            errors.push("transcode.segment_seconds must be non-zero".to_string());
        }
        for rendition in &self.transcode.ladder {
            if let Err(e) = rendition.validate() {
                errors.push(format!("transcode.ladder: {e}"));
            }
        }
        if self.chat.rate_limit_messages == 0 || self.chat.rate_limit_window_seconds == 0 {
            errors.push("chat rate limit must allow at least one message per window".to_string());
        }
        if self.chat.max_message_length == 0 {
            errors.push("chat.max_message_length must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.chat.rate_limit_messages, 3);
        assert_eq!(config.chat.rate_limit_window_seconds, 5);
        assert_eq!(config.signaling.ping_interval_seconds, 30);
        assert!(config.transcode.ladder.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_address() {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                http_port: 9000,
            },
            ..Default::default()
        };

        assert_eq!(config.http_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_feed_url_trims_trailing_slash() {
        let ingest = IngestConfig {
            base_url: "rtmp://localhost/live/".to_string(),
        };
        assert_eq!(ingest.feed_url("abc123"), "rtmp://localhost/live/abc123");
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        config.chat.rate_limit_messages = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  http_port: 9191\nchat:\n  rate_limit_messages: 10\ntranscode:\n  ladder:\n    - name: 240p\n      width: 426\n      height: 240\n      video_bitrate_kbps: 400"
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.http_port, 9191);
        assert_eq!(config.chat.rate_limit_messages, 10);
        assert_eq!(config.chat.rate_limit_window_seconds, 5);
        assert_eq!(config.transcode.ladder.len(), 1);
        assert_eq!(config.transcode.ladder[0].audio_bitrate_kbps, 128);
    }
}

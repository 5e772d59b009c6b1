//! Structured logging for the server and its media pipeline
//!
//! The configured level applies to this service's own crates. HTTP clients,
//! TLS and connection plumbing stay at `warn` unless a per-target override
//! says otherwise. `RUST_LOG` replaces the whole filter when set.

use std::str::FromStr;
use std::sync::Arc;
use tracing::{Level, Span};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

/// Targets that follow `logging.level`
const SERVICE_TARGETS: &[&str] = &[
    "spreadify",
    "spreadify_core",
    "spreadify_livestream",
    "tower_http",
];

/// Level for everything outside [`SERVICE_TARGETS`]
const DEPENDENCY_LEVEL: &str = "warn";

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, with the enclosing stream span
    Json,
    /// Multi-line, human-readable
    Pretty,
    /// Single line per event, for container logs
    Compact,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            _ => Err(anyhow::anyhow!(
                "Invalid log format '{s}', expected json, pretty or compact"
            )),
        }
    }
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let format: LogFormat = config.format.parse()?;
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(config)?)?,
    };

    let (writer, ansi) = match &config.file_path {
        Some(path) => (BoxMakeWriter::new(open_log_file(path)?), false),
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let layer: BoxedLayer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(true)
            .with_line_number(true)
            .with_file(false)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
    Ok(())
}

/// `EnvFilter` directives for `config`: dependencies at `warn`, service
/// targets at the configured level, then the per-target overrides.
pub fn filter_directives(config: &LoggingConfig) -> anyhow::Result<String> {
    let level = level_directive(parse_log_level(&config.level)?);

    let mut directives = vec![DEPENDENCY_LEVEL.to_string()];
    directives.extend(SERVICE_TARGETS.iter().map(|target| format!("{target}={level}")));
    for (target, target_level) in &config.targets {
        let target_level = parse_log_level(target_level)
            .map_err(|e| anyhow::anyhow!("logging.targets.{target}: {e}"))?;
        directives.push(format!("{target}={}", level_directive(target_level)));
    }
    Ok(directives.join(","))
}

/// Span for one lifecycle transition of a stream; events inside it carry
/// the operation and the stream key.
#[must_use]
pub fn stream_span(operation: &'static str, stream_key: &str) -> Span {
    tracing::info_span!("stream", operation, stream_key = %stream_key)
}

fn level_directive(level: Level) -> String {
    level.as_str().to_ascii_lowercase()
}

fn open_log_file(path: &str) -> anyhow::Result<Arc<std::fs::File>> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(Arc::new(file))
}

pub(crate) fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

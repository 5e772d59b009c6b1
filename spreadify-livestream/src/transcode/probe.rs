//! Source audio detection via ffprobe

use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use spreadify_core::Result;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
}

/// Whether ffprobe's JSON output lists an audio stream
pub fn parse_probe_output(stdout: &[u8]) -> Result<bool> {
    let output: ProbeOutput = serde_json::from_slice(stdout)?;
    Ok(output
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio")))
}

fn probe_args(input_url: &str) -> Vec<String> {
    [
        "-v",
        "error",
        "-select_streams",
        "a",
        "-show_entries",
        "stream=codec_type",
        "-of",
        "json",
        input_url,
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Probe the source once for an audio track.
///
/// Any failure (spawn error, non-zero exit, timeout, bad output) is logged
/// and treated as "no audio" so encoding can still proceed.
pub async fn has_audio(ffprobe_path: &str, input_url: &str, timeout: Duration) -> bool {
    let output = Command::new(ffprobe_path)
        .args(probe_args(input_url))
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, output).await {
        Ok(Ok(output)) if output.status.success() => match parse_probe_output(&output.stdout) {
            Ok(found) => {
                debug!(input = %input_url, has_audio = found, "Probed source audio");
                found
            }
            Err(e) => {
                warn!(input = %input_url, error = %e, "Unreadable probe output, assuming no audio");
                false
            }
        },
        Ok(Ok(output)) => {
            warn!(
                input = %input_url,
                status = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Audio probe failed, assuming no audio"
            );
            false
        }
        Ok(Err(e)) => {
            warn!(input = %input_url, error = %e, "Could not run ffprobe, assuming no audio");
            false
        }
        Err(_) => {
            warn!(
                input = %input_url,
                timeout_ms = timeout.as_millis() as u64,
                "Audio probe timed out, assuming no audio"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let with_audio = br#"{"programs":[],"streams":[{"codec_type":"audio"}]}"#;
        assert!(parse_probe_output(with_audio).unwrap());

        let silent = br#"{"programs":[],"streams":[]}"#;
        assert!(!parse_probe_output(silent).unwrap());

        assert!(!parse_probe_output(b"{}").unwrap());
        assert!(parse_probe_output(b"not json").is_err());
    }

    #[test]
    fn test_probe_args_end_with_input() {
        let args = probe_args("rtmp://localhost/live/abc");
        assert_eq!(args.last().map(String::as_str), Some("rtmp://localhost/live/abc"));
        assert!(args.contains(&"stream=codec_type".to_string()));
    }

    #[tokio::test]
    async fn test_missing_ffprobe_means_no_audio() {
        assert!(!has_audio("/nonexistent/ffprobe", "rtmp://x/live/k", Duration::from_secs(1)).await);
    }
}

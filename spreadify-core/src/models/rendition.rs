use serde::{Deserialize, Serialize};

/// One output quality of the transcoding ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
}

const fn default_audio_bitrate() -> u32 {
    128
}

const fn default_frame_rate() -> u32 {
    30
}

impl Rendition {
    #[must_use]
    pub fn new(name: &str, width: u32, height: u32, video_bitrate_kbps: u32) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            video_bitrate_kbps,
            audio_bitrate_kbps: default_audio_bitrate(),
            frame_rate: default_frame_rate(),
        }
    }

    /// Peak bandwidth advertised in the master playlist, in bits per second.
    #[must_use]
    pub const fn bandwidth_bps(&self) -> u64 {
        (self.video_bitrate_kbps as u64 + self.audio_bitrate_kbps as u64) * 1000
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!("invalid rendition name '{}'", self.name));
        }
        if self.width == 0 || self.height == 0 {
            return Err(format!("rendition {} has an empty resolution", self.name));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(format!("rendition {} must have even dimensions", self.name));
        }
        if self.video_bitrate_kbps == 0 || self.frame_rate == 0 {
            return Err(format!("rendition {} needs a bitrate and frame rate", self.name));
        }
        Ok(())
    }
}

/// Encoding progress of one rendition of a live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingStatus {
    Pending,
    Encoding,
    Ready,
    Failed,
}

impl EncodingStatus {
    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(self, Self::Failed)
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::id::generate_id;

pub const MAX_POSITION_X: u32 = 1920;
pub const MAX_POSITION_Y: u32 = 1080;
pub const MAX_SCALE_PERCENT: u32 = 400;

/// An image composited into every rendition at a fixed pixel offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlay {
    pub id: String,
    pub image_path: PathBuf,
    pub position_x: u32,
    pub position_y: u32,
    /// Percentage of the image's native size (100 = unscaled)
    pub scale: u32,
    pub active: bool,
}

impl Overlay {
    #[must_use]
    pub fn new(image_path: impl Into<PathBuf>, position_x: u32, position_y: u32, scale: u32) -> Self {
        Self {
            id: generate_id(),
            image_path: image_path.into(),
            position_x,
            position_y,
            scale,
            active: true,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.image_path.as_os_str().is_empty() {
            return Err("overlay image path is empty".to_string());
        }
        if self.position_x > MAX_POSITION_X || self.position_y > MAX_POSITION_Y {
            return Err(format!(
                "overlay position ({}, {}) is outside {MAX_POSITION_X}x{MAX_POSITION_Y}",
                self.position_x, self.position_y
            ));
        }
        if self.scale == 0 || self.scale > MAX_SCALE_PERCENT {
            return Err(format!(
                "overlay scale {} must be between 1 and {MAX_SCALE_PERCENT}",
                self.scale
            ));
        }
        Ok(())
    }
}

/// Partial update of an overlay; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayUpdate {
    pub image_path: Option<PathBuf>,
    pub position_x: Option<u32>,
    pub position_y: Option<u32>,
    pub scale: Option<u32>,
    pub active: Option<bool>,
}

impl OverlayUpdate {
    pub fn apply(self, overlay: &mut Overlay) {
        if let Some(path) = self.image_path {
            overlay.image_path = path;
        }
        if let Some(x) = self.position_x {
            overlay.position_x = x;
        }
        if let Some(y) = self.position_y {
            overlay.position_y = y;
        }
        if let Some(scale) = self.scale {
            overlay.scale = scale;
        }
        if let Some(active) = self.active {
            overlay.active = active;
        }
    }
}

use std::collections::HashSet;

use spreadify_core::{config::TranscodeConfig, models::Rendition, Error, Result};

/// Built-in ladder, highest quality first
#[must_use]
pub fn default_ladder() -> Vec<Rendition> {
    vec![
        Rendition::new("1080p", 1920, 1080, 6000),
        Rendition::new("720p", 1280, 720, 4000),
        Rendition::new("480p", 854, 480, 2000),
        Rendition::new("360p", 640, 360, 1000),
    ]
}

/// Validated, ordered set of renditions produced for every live stream.
///
/// Fixed for the lifetime of the engine; a stream that is already encoding
/// keeps the renditions it started with.
#[derive(Debug, Clone)]
pub struct QualityLadder {
    renditions: Vec<Rendition>,
}

impl QualityLadder {
    pub fn new(renditions: Vec<Rendition>) -> Result<Self> {
        if renditions.is_empty() {
            return Err(Error::InvalidInput(
                "quality ladder needs at least one rendition".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for rendition in &renditions {
            rendition.validate().map_err(Error::InvalidInput)?;
            if !names.insert(rendition.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate rendition name '{}'",
                    rendition.name
                )));
            }
        }

        Ok(Self { renditions })
    }

    /// The configured ladder, or the built-in one when none is configured
    pub fn from_config(config: &TranscodeConfig) -> Result<Self> {
        if config.ladder.is_empty() {
            Ok(Self::default())
        } else {
            Self::new(config.ladder.clone())
        }
    }

    #[must_use]
    pub fn renditions(&self) -> &[Rendition] {
        &self.renditions
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Rendition> {
        self.renditions.iter().find(|r| r.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.renditions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.renditions.is_empty()
    }
}

impl Default for QualityLadder {
    fn default() -> Self {
        Self {
            renditions: default_ladder(),
        }
    }
}

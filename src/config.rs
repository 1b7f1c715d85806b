//! Persisted engine settings.
//!
//! Stored as JSON next to the player's other settings, by default at
//! `<config dir>/linamp/config.json`.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::beat_detector::DetectorKind;
use crate::audio::crossfade::{DEFAULT_CROSSFADE_DURATION, MAX_CROSSFADE_DURATION, MIN_CROSSFADE_DURATION};
use crate::audio::publisher::DEFAULT_SMOOTHING_ALPHA;
use crate::audio::SAMPLE_RATE;
use crate::error::{EngineError, Result};

pub const DEFAULT_VOLUME: f32 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub volume: f32,
    pub crossfade_enabled: bool,
    pub crossfade_duration: f32,
    pub beat_aware_enabled: bool,
    pub smoothing_alpha: f32,
    pub detector: DetectorKind,
    pub sample_rate: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOLUME,
            crossfade_enabled: false,
            crossfade_duration: DEFAULT_CROSSFADE_DURATION,
            beat_aware_enabled: false,
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
            detector: DetectorKind::default(),
            sample_rate: SAMPLE_RATE,
        }
    }
}

impl EngineConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("linamp").join("config.json"))
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}; using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config.validated())
    }

    /// Like `load`, but a broken file is logged and replaced by defaults.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            warn!("Failed to load config {}: {}", path.display(), e);
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Clamps every field into its supported range.
    pub fn validated(mut self) -> Self {
        self.volume = clamp_or(self.volume, 0.0, 1.0, DEFAULT_VOLUME);
        self.crossfade_duration = clamp_or(
            self.crossfade_duration,
            MIN_CROSSFADE_DURATION,
            MAX_CROSSFADE_DURATION,
            DEFAULT_CROSSFADE_DURATION,
        );
        self.smoothing_alpha = clamp_or(self.smoothing_alpha, 0.0, 1.0, DEFAULT_SMOOTHING_ALPHA);
        if self.sample_rate == 0 {
            self.sample_rate = SAMPLE_RATE;
        }
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        Ok(config.validated())
    }
}

pub(crate) fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

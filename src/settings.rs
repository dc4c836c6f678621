//! Layered settings: built-in defaults, then a TOML file, then `WITNESS_*`
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::{CaptureConfig, DisplayId, Region};
use crate::encoder::QualityLevel;
use crate::error::SettingsError;
use crate::pipeline::RecordingLimits;

const ENV_PREFIX: &str = "WITNESS";
const MAX_FPS: u32 = 200;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub capture: CaptureSettings,
    pub encoder: EncoderSettings,
    pub recording: RecordingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub fps: u32,
    /// 0 is the primary display, n > 0 the n-th enumerated one
    pub display: u32,
    pub buffer_frames: usize,
    pub max_consecutive_failures: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let defaults = CaptureConfig::default();
        Self {
            fps: defaults.fps,
            display: defaults.display.into(),
            buffer_frames: defaults.buffer_frames,
            max_consecutive_failures: defaults.max_consecutive_failures,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub quality: QualityLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub max_frames: Option<u64>,
    pub max_duration_secs: Option<u64>,
    pub error_budget: Option<u64>,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            max_frames: Some(300),
            max_duration_secs: None,
            error_budget: None,
        }
    }
}

impl Settings {
    /// `~/.config/witness/witness.toml`
    pub fn default_path() -> Option<PathBuf> {
        crate::config_dir().map(|dir| dir.join("witness.toml"))
    }

    /// Loads settings. An explicit `path` must exist; without one the default
    /// file is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_with_env(path, ENV_PREFIX)
    }

    fn load_with_env(path: Option<&Path>, prefix: &str) -> Result<Self, SettingsError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);

        match path {
            Some(path) => {
                debug!(path = %path.display(), "Loading settings");
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(path) = Self::default_path() {
                    builder = builder.add_source(File::from(path).required(false));
                }
            }
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let fps = self.capture.fps;
        if !(1..=MAX_FPS).contains(&fps) {
            return Err(SettingsError::Invalid(format!(
                "capture.fps must be between 1 and {}, got {}",
                MAX_FPS, fps
            )));
        }
        if self.capture.buffer_frames == 0 {
            return Err(SettingsError::Invalid(
                "capture.buffer_frames must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn capture_config(&self, region: Option<Region>) -> CaptureConfig {
        CaptureConfig {
            region,
            fps: self.capture.fps,
            display: DisplayId::from(self.capture.display),
            buffer_frames: self.capture.buffer_frames,
            max_consecutive_failures: self.capture.max_consecutive_failures,
        }
    }

    pub fn limits(&self) -> RecordingLimits {
        RecordingLimits {
            max_frames: self.recording.max_frames,
            max_duration: self.recording.max_duration_secs.map(Duration::from_secs),
            error_budget: self.recording.error_budget,
        }
    }
}

//! Configuration loading with graceful degradation
//!
//! Resolution order for the config file:
//! 1. Explicit path (command line)
//! 2. `XAPU_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/xapu/config.toml`)
//! 4. Compiled defaults
//!
//! A missing file is not an error: a warning is logged and defaults are used.
//! A file that exists but does not parse is an error.

use crate::params::{self, AUDIO_SAMPLES_RANGE, FIFO_FRAMES_RANGE};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "XAPU_CONFIG";

/// Environment override for `audio.fifo_frames`
pub const FIFO_FRAMES_ENV_VAR: &str = "XAPU_AUDIO_FIFO_FRAMES";

/// Environment override for `audio.audio_samples`
pub const AUDIO_SAMPLES_ENV_VAR: &str = "XAPU_AUDIO_SAMPLES";

/// Top-level TOML configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub frame: FrameConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Host audio and transfer FIFO settings
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Transfer FIFO depth in rendered frames
    #[serde(default = "default_fifo_frames")]
    pub fifo_frames: u32,

    /// Requested host audio buffer size (samples per channel)
    #[serde(default = "default_audio_samples")]
    pub audio_samples: u32,

    /// Output sample rate (Hz)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Soft volume limit, `[0.0, 1.0]`
    #[serde(default = "default_volume_limit")]
    pub volume_limit: f32,

    /// Backend output device name (None = default device)
    #[serde(default)]
    pub device: Option<String>,

    #[serde(default = "default_drain_retry_count")]
    pub drain_retry_count: u32,

    #[serde(default = "default_drain_retry_sleep_us")]
    pub drain_retry_sleep_us: u64,
}

/// Frame geometry
#[derive(Debug, Clone, Deserialize)]
pub struct FrameConfig {
    #[serde(default = "default_samples_per_subframe")]
    pub samples_per_subframe: u32,

    #[serde(default = "default_subframes_per_frame")]
    pub subframes_per_frame: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_fifo_frames() -> u32 {
    3
}

fn default_audio_samples() -> u32 {
    512
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_volume_limit() -> f32 {
    1.0
}

fn default_drain_retry_count() -> u32 {
    10
}

fn default_drain_retry_sleep_us() -> u64 {
    500
}

fn default_samples_per_subframe() -> u32 {
    32
}

fn default_subframes_per_frame() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            fifo_frames: default_fifo_frames(),
            audio_samples: default_audio_samples(),
            sample_rate: default_sample_rate(),
            volume_limit: default_volume_limit(),
            device: None,
            drain_retry_count: default_drain_retry_count(),
            drain_retry_sleep_us: default_drain_retry_sleep_us(),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            samples_per_subframe: default_samples_per_subframe(),
            subframes_per_frame: default_subframes_per_frame(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(text)?;
        Ok(config)
    }


    /// Resolve, load, apply environment overrides and validate
    ///
    /// Never fails because a file is missing or unreadable; fails only on a malformed file
    /// or a value outside its accepted range.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path) {
            Some(path) => match std::fs::read_to_string(&path) {
                Ok(text) => {
                    info!("Loading configuration from {}", path.display());
                    Self::from_toml_str(&text)?
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(
                        "Config file {} not found, using built-in defaults",
                        path.display()
                    );
                    Self::default()
                }
                Err(e) => {
                    warn!(
                        "Config file {} unreadable ({}), using built-in defaults",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            None => {
                info!("No config file found, using built-in defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply clamped integer overrides from the environment
    pub fn apply_env_overrides(&mut self) {
        self.audio.fifo_frames = params::env_int_clamped(
            FIFO_FRAMES_ENV_VAR,
            FIFO_FRAMES_RANGE.0,
            FIFO_FRAMES_RANGE.1,
            self.audio.fifo_frames as i64,
        ) as u32;
        self.audio.audio_samples = params::env_int_clamped(
            AUDIO_SAMPLES_ENV_VAR,
            AUDIO_SAMPLES_RANGE.0,
            AUDIO_SAMPLES_RANGE.1,
            self.audio.audio_samples as i64,
        ) as u32;
    }

    /// Validate every tunable against its metadata row
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("fifo_frames", self.audio.fifo_frames.to_string()),
            ("audio_samples", self.audio.audio_samples.to_string()),
            ("sample_rate", self.audio.sample_rate.to_string()),
            ("volume_limit", self.audio.volume_limit.to_string()),
            ("drain_retry_count", self.audio.drain_retry_count.to_string()),
            ("drain_retry_sleep_us", self.audio.drain_retry_sleep_us.to_string()),
            ("samples_per_subframe", self.frame.samples_per_subframe.to_string()),
            ("subframes_per_frame", self.frame.subframes_per_frame.to_string()),
        ];

        for (key, value) in checks.iter() {
            params::validate(key, value).map_err(|e| Error::Config(e.to_string()))?;
        }
        Ok(())
    }
}

/// Locate the configuration file following the documented priority order
///
/// Returns `None` when no candidate path can even be named (no explicit path,
/// no environment variable, no platform config directory).
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let platform = dirs::config_dir().map(|d| d.join("xapu").join("config.toml"))?;
    if platform.exists() {
        Some(platform)
    } else {
        None
    }
}

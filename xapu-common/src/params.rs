//! Tunable parameter metadata
//!
//! Single source of truth for every tunable the APU reads at realization:
//! key, type, default, accepted range and a validator. Config validation and
//! environment overrides both delegate to this table so the ranges live in
//! exactly one place.

use crate::{Error, Result};
use tracing::{debug, warn};

/// Parameter metadata row
///
/// ```rust
/// # use xapu_common::params::{metadata, ParamMetadata};
/// let meta = metadata().iter().find(|m| m.key == "volume_limit").unwrap();
///
/// assert!((meta.validator)("0.5").is_ok());
/// assert!((meta.validator)("2.0").is_err());
/// ```
pub struct ParamMetadata {
    pub key: &'static str,
    pub data_type: &'static str,
    pub default_value: &'static str,
    pub description: &'static str,
    pub validation_range: &'static str,
    pub validator: fn(&str) -> std::result::Result<(), String>,
}

impl std::fmt::Debug for ParamMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamMetadata")
            .field("key", &self.key)
            .field("data_type", &self.data_type)
            .field("default_value", &self.default_value)
            .field("validation_range", &self.validation_range)
            .finish()
    }
}

/// Inclusive range for the FIFO depth in frames
pub const FIFO_FRAMES_RANGE: (i64, i64) = (3, 32);

/// Inclusive range for the host audio buffer size in samples
pub const AUDIO_SAMPLES_RANGE: (i64, i64) = (256, 4096);

fn check_int(key: &str, s: &str, min: i64, max: i64) -> std::result::Result<(), String> {
    let v: i64 = s
        .parse()
        .map_err(|_| format!("{}: invalid integer format", key))?;
    if !(min..=max).contains(&v) {
        return Err(format!("{}: value {} out of range [{}, {}]", key, v, min, max));
    }
    Ok(())
}

/// Get metadata for all tunable parameters
pub fn metadata() -> &'static [ParamMetadata] {
    &[
        ParamMetadata {
            key: "fifo_frames",
            data_type: "u32",
            default_value: "3",
            description: "Transfer FIFO depth in rendered frames",
            validation_range: "3-32",
            validator: |s| check_int("fifo_frames", s, FIFO_FRAMES_RANGE.0, FIFO_FRAMES_RANGE.1),
        },
        ParamMetadata {
            key: "audio_samples",
            data_type: "u32",
            default_value: "512",
            description: "Requested host audio buffer size (samples per channel)",
            validation_range: "256-4096",
            validator: |s| check_int("audio_samples", s, AUDIO_SAMPLES_RANGE.0, AUDIO_SAMPLES_RANGE.1),
        },
        ParamMetadata {
            key: "sample_rate",
            data_type: "u32",
            default_value: "48000",
            description: "Output sample rate (Hz)",
            validation_range: "8000-192000",
            validator: |s| check_int("sample_rate", s, 8000, 192_000),
        },
        ParamMetadata {
            key: "volume_limit",
            data_type: "f32",
            default_value: "1.0",
            description: "Soft volume limit; values below 1.0 apply a perceptual curve",
            validation_range: "0.0-1.0",
            validator: |s| {
                let v: f32 = s
                    .parse()
                    .map_err(|_| "volume_limit: invalid number format".to_string())?;
                if !(0.0..=1.0).contains(&v) {
                    return Err(format!("volume_limit: value {} out of range [0.0, 1.0]", v));
                }
                Ok(())
            },
        },
        ParamMetadata {
            key: "drain_retry_count",
            data_type: "u32",
            default_value: "10",
            description: "Occupancy polls the drain callback makes before accepting an underrun",
            validation_range: "0-100",
            validator: |s| check_int("drain_retry_count", s, 0, 100),
        },
        ParamMetadata {
            key: "drain_retry_sleep_us",
            data_type: "u64",
            default_value: "500",
            description: "Sleep between drain callback polls (microseconds)",
            validation_range: "0-5000",
            validator: |s| check_int("drain_retry_sleep_us", s, 0, 5000),
        },
        ParamMetadata {
            key: "samples_per_subframe",
            data_type: "u32",
            default_value: "32",
            description: "Samples rendered per sub-frame tick",
            validation_range: "1-1024",
            validator: |s| check_int("samples_per_subframe", s, 1, 1024),
        },
        ParamMetadata {
            key: "subframes_per_frame",
            data_type: "u32",
            default_value: "8",
            description: "Sub-frame ticks per throttled frame push",
            validation_range: "1-64",
            validator: |s| check_int("subframes_per_frame", s, 1, 64),
        },
    ]
}

/// Validate a value against the metadata row for `key`
pub fn validate(key: &str, value: &str) -> Result<()> {
    let meta = metadata()
        .iter()
        .find(|m| m.key == key)
        .ok_or_else(|| Error::InvalidInput(format!("unknown parameter: {}", key)))?;
    (meta.validator)(value).map_err(Error::InvalidInput)
}

/// Read an integer from the environment, clamped into `[min, max]`
///
/// Missing, empty or unparsable values yield `fallback`. Values outside the
/// range are clamped rather than rejected.
pub fn env_int_clamped(name: &str, min: i64, max: i64, fallback: i64) -> i64 {
    let value = match std::env::var(name) {
        Ok(v) if !v.is_empty() => v,
        _ => return fallback,
    };

    match value.trim().parse::<i64>() {
        Ok(parsed) => {
            let clamped = parsed.clamp(min, max);
            if clamped != parsed {
                warn!("{}={} out of range [{}, {}], clamped to {}", name, parsed, min, max, clamped);
            } else {
                debug!("{} override: {}", name, clamped);
            }
            clamped
        }
        Err(_) => {
            warn!("{}={:?} is not an integer, ignoring", name, value);
            fallback
        }
    }
}

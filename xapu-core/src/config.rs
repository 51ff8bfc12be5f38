//! Device configuration
//!
//! Realization-time parameters of the APU. Built from the shared TOML config
//! (`xapu_common::config::TomlConfig`) or constructed directly by tests.

use crate::error::{Error, Result};
use std::time::Duration;
use xapu_common::config::TomlConfig;

/// Output channel count (stereo, fixed per build)
pub const CHANNELS: usize = 2;

/// Bytes per output sample (signed 16-bit little-endian)
pub const BYTES_PER_SAMPLE: usize = 2;

/// Number of mixbins the mixing stage renders per sub-frame
pub const NUM_MIXBINS: usize = 32;

/// Frame geometry: how sub-frame ticks compose a pushed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Output sample rate (Hz)
    pub sample_rate: u32,
    /// Samples rendered per sub-frame tick
    pub samples_per_subframe: usize,
    /// Sub-frame ticks per throttled frame push
    pub subframes_per_frame: u32,
}

impl FrameGeometry {
    /// Stereo samples in one pushed frame
    pub fn frame_samples(&self) -> usize {
        self.samples_per_subframe * self.subframes_per_frame as usize
    }

    /// Bytes in one pushed frame
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * CHANNELS * BYTES_PER_SAMPLE
    }

    /// Wall-clock duration of one pushed frame, in microseconds
    pub fn frame_period_us(&self) -> u64 {
        self.frame_samples() as u64 * 1_000_000 / self.sample_rate as u64
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_micros(self.frame_period_us())
    }

    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.samples_per_subframe == 0 || self.subframes_per_frame == 0 {
            return Err(Error::Config(format!("degenerate frame geometry: {:?}", self)));
        }
        if self.frame_period_us() == 0 {
            return Err(Error::Config(format!(
                "frame period rounds to zero at {} Hz",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            samples_per_subframe: 32,
            subframes_per_frame: 8,
        }
    }
}

/// Realization-time APU configuration
#[derive(Debug, Clone)]
pub struct ApuConfig {
    pub geometry: FrameGeometry,
    /// Transfer FIFO depth in frames
    pub fifo_frames: usize,
    /// Expected host buffer size in samples per channel, used to size the
    /// watermarks until a backend reports its negotiated size
    pub audio_samples: usize,
    /// Soft volume limit; `>= 1.0` disables shaping
    pub volume_limit: f32,
    /// Occupancy polls the drain callback makes before accepting an underrun
    pub drain_retry_count: u32,
    /// Sleep between drain callback polls
    pub drain_retry_sleep: Duration,
}

impl Default for ApuConfig {
    fn default() -> Self {
        Self {
            geometry: FrameGeometry::default(),
            fifo_frames: 3,
            audio_samples: 512,
            volume_limit: 1.0,
            drain_retry_count: 10,
            drain_retry_sleep: Duration::from_micros(500),
        }
    }
}

impl ApuConfig {
    /// Build from the shared TOML configuration
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        let apu = Self {
            geometry: FrameGeometry {
                sample_rate: config.audio.sample_rate,
                samples_per_subframe: config.frame.samples_per_subframe as usize,
                subframes_per_frame: config.frame.subframes_per_frame,
            },
            fifo_frames: config.audio.fifo_frames as usize,
            audio_samples: config.audio.audio_samples as usize,
            volume_limit: config.audio.volume_limit,
            drain_retry_count: config.audio.drain_retry_count,
            drain_retry_sleep: Duration::from_micros(config.audio.drain_retry_sleep_us),
        };
        apu.validate()?;
        Ok(apu)
    }

    /// Ring buffer capacity in bytes
    pub fn fifo_capacity_bytes(&self) -> usize {
        self.fifo_frames * self.geometry.frame_bytes()
    }

    /// Host buffer size in bytes for the configured sample count
    pub fn device_buffer_bytes(&self) -> usize {
        self.audio_samples * CHANNELS * BYTES_PER_SAMPLE
    }

    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        if self.fifo_frames < 2 {
            return Err(Error::Config(format!(
                "fifo_frames must be at least 2 (got {})",
                self.fifo_frames
            )));
        }
        if !self.volume_limit.is_finite() {
            return Err(Error::Config("volume_limit must be finite".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry() {
        let g = FrameGeometry::default();
        assert_eq!(g.frame_samples(), 256);
        assert_eq!(g.frame_bytes(), 1024);
        assert_eq!(g.frame_period_us(), 5_333);
    }

    #[test]
    fn test_from_default_toml() {
        let config = ApuConfig::from_toml(&TomlConfig::default()).unwrap();
        assert_eq!(config.fifo_capacity_bytes(), 3 * 1024);
        assert_eq!(config.device_buffer_bytes(), 512 * 4);
        assert_eq!(config.drain_retry_sleep, Duration::from_micros(500));
    }

    #[test]
    fn test_rejects_single_frame_fifo() {
        let config = ApuConfig {
            fifo_frames: 1,
            ..ApuConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_geometry() {
        let mut config = ApuConfig::default();
        config.geometry.samples_per_subframe = 0;
        assert!(config.validate().is_err());
    }
}

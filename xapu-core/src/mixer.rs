//! Built-in mixing stages
//!
//! The real voice processor and DSPs plug in through [`Mixer`]. These two
//! stand in for them in the demo binary and in tests.

use crate::error::{Error, Result};
use crate::pipeline::frame::{MixBins, Mixer, MIXBIN_LEFT, MIXBIN_RIGHT};
use crate::regs::RegisterFile;
use std::f64::consts::TAU;

/// Renders nothing; every mixbin stays zero
#[derive(Debug, Default, Clone, Copy)]
pub struct SilenceMixer;

impl Mixer for SilenceMixer {
    fn render(&mut self, _regs: &RegisterFile, _mixbins: &mut MixBins) {}
}

/// Sine tone on both output bins
#[derive(Debug, Clone)]
pub struct ToneMixer {
    frequency: f64,
    amplitude: f32,
    sample_rate: f64,
    /// Phase in cycles, `[0, 1)`
    phase: f64,
}

impl ToneMixer {
    pub fn new(frequency: f64, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            frequency,
            amplitude,
            sample_rate: sample_rate as f64,
            phase: 0.0,
        }
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }
}

impl Mixer for ToneMixer {
    fn render(&mut self, _regs: &RegisterFile, mixbins: &mut MixBins) {
        let step = self.frequency / self.sample_rate;
        for i in 0..mixbins.samples() {
            let s = (self.phase * TAU).sin() as f32 * self.amplitude;
            mixbins.bin_mut(MIXBIN_LEFT)[i] = s;
            mixbins.bin_mut(MIXBIN_RIGHT)[i] = s;
            self.phase = (self.phase + step).fract();
        }
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }

    fn save_state(&self) -> Vec<u8> {
        self.phase.to_le_bytes().to_vec()
    }

    fn load_state(&mut self, state: &[u8]) -> Result<()> {
        let bytes: [u8; 8] = state
            .try_into()
            .map_err(|_| Error::Snapshot(format!("tone state is {} bytes, expected 8", state.len())))?;
        self.phase = f64::from_le_bytes(bytes);
        Ok(())
    }
}

//! Frame assembly
//!
//! The mixing stage renders one sub-frame of per-mixbin samples per tick.
//! [`FrameAssembler`] collects the output bins of each tick into a stereo
//! frame, applies the soft volume curve, and encodes it as interleaved
//! signed 16-bit little-endian PCM ready for the FIFO.

use crate::config::{FrameGeometry, BYTES_PER_SAMPLE, CHANNELS, NUM_MIXBINS};
use crate::error::Result;
use crate::regs::RegisterFile;

/// Mixbin carrying the left output channel
pub const MIXBIN_LEFT: usize = 0;
/// Mixbin carrying the right output channel
pub const MIXBIN_RIGHT: usize = 1;

/// Sample computation stage invoked once per sub-frame tick
///
/// Implementations read whatever register state they need and write into the
/// mixbins, which arrive zeroed.
pub trait Mixer: Send {
    fn render(&mut self, regs: &RegisterFile, mixbins: &mut MixBins);

    /// Drop cached execution state (called on device reset)
    fn reset(&mut self) {}

    /// Opaque state carried in snapshots
    fn save_state(&self) -> Vec<u8> {
        Vec::new()
    }

    fn load_state(&mut self, _state: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Per-mixbin sample buffers for one sub-frame
#[derive(Debug, Clone)]
pub struct MixBins {
    samples: usize,
    data: Vec<f32>,
}

impl MixBins {
    pub fn new(samples_per_subframe: usize) -> Self {
        Self {
            samples: samples_per_subframe,
            data: vec![0.0; NUM_MIXBINS * samples_per_subframe],
        }
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn bin(&self, index: usize) -> &[f32] {
        &self.data[index * self.samples..(index + 1) * self.samples]
    }

    pub fn bin_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.data[index * self.samples..(index + 1) * self.samples]
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }
}

/// Volume curve applied to a whole frame
///
/// Limits in `[0, 1)` scale by `limit^e`; anything else leaves samples as they are.
pub fn volume_factor(volume_limit: f32) -> Option<f32> {
    (0.0..1.0)
        .contains(&volume_limit)
        .then(|| volume_limit.powf(std::f32::consts::E))
}

pub fn shape_volume(frame: &mut [[f32; CHANNELS]], volume_limit: f32) {
    if let Some(f) = volume_factor(volume_limit) {
        for sample in frame.iter_mut() {
            sample[0] *= f;
            sample[1] *= f;
        }
    }
}

/// Convert one sample to signed 16-bit, saturating outside `[-1, 1]`
pub fn encode_sample(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Accumulates sub-frames into one encoded output frame
#[derive(Debug)]
pub struct FrameAssembler {
    geometry: FrameGeometry,
    frame: Vec<[f32; CHANNELS]>,
    encoded: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(geometry: FrameGeometry) -> Self {
        Self {
            geometry,
            frame: vec![[0.0; CHANNELS]; geometry.frame_samples()],
            encoded: vec![0; geometry.frame_bytes()],
        }
    }

    /// Copy the output bins of sub-frame `index` (within the current frame)
    pub fn take_subframe(&mut self, index: usize, mixbins: &MixBins) {
        let n = self.geometry.samples_per_subframe;
        let slot = &mut self.frame[index * n..(index + 1) * n];
        let left = mixbins.bin(MIXBIN_LEFT);
        let right = mixbins.bin(MIXBIN_RIGHT);
        for (i, sample) in slot.iter_mut().enumerate() {
            *sample = [left[i], right[i]];
        }
    }

    /// Shape and encode the accumulated frame, then clear the accumulator
    pub fn finish(&mut self, volume_limit: f32) -> &[u8] {
        shape_volume(&mut self.frame, volume_limit);

        for (sample, out) in self
            .frame
            .iter()
            .zip(self.encoded.chunks_exact_mut(CHANNELS * BYTES_PER_SAMPLE))
        {
            out[..2].copy_from_slice(&encode_sample(sample[0]).to_le_bytes());
            out[2..].copy_from_slice(&encode_sample(sample[1]).to_le_bytes());
        }

        self.frame.fill([0.0; CHANNELS]);
        &self.encoded
    }
}

//! Deterministic mixing stages

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use xapu_core::pipeline::frame::{MIXBIN_LEFT, MIXBIN_RIGHT};
use xapu_core::pipeline::MixBins;
use xapu_core::regs::RegisterFile;
use xapu_core::Mixer;

/// Writes the same value to every output sample
#[derive(Debug, Clone)]
pub struct ConstMixer {
    pub value: f32,
    pub renders: Arc<AtomicU64>,
}

impl ConstMixer {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            renders: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Mixer for ConstMixer {
    fn render(&mut self, _regs: &RegisterFile, mixbins: &mut MixBins) {
        mixbins.bin_mut(MIXBIN_LEFT).fill(self.value);
        mixbins.bin_mut(MIXBIN_RIGHT).fill(self.value);
        self.renders.fetch_add(1, Ordering::Relaxed);
    }
}

/// Left channel carries a per-sample sequence number, scaled so it survives
/// 16-bit encoding: sample k encodes as `k % 32768`
#[derive(Debug, Default)]
pub struct CountingMixer {
    next: u64,
}

impl Mixer for CountingMixer {
    fn render(&mut self, _regs: &RegisterFile, mixbins: &mut MixBins) {
        for i in 0..mixbins.samples() {
            let k = (self.next % 32_768) as f32;
            // Middle of the quantization step so truncation lands on k
            mixbins.bin_mut(MIXBIN_LEFT)[i] = (k + 0.5) / i16::MAX as f32;
            self.next += 1;
        }
    }

    fn reset(&mut self) {
        self.next = 0;
    }

    fn save_state(&self) -> Vec<u8> {
        self.next.to_le_bytes().to_vec()
    }

    fn load_state(&mut self, state: &[u8]) -> xapu_core::Result<()> {
        let bytes: [u8; 8] = state
            .try_into()
            .map_err(|_| xapu_core::Error::Snapshot("bad counter state".to_string()))?;
        self.next = u64::from_le_bytes(bytes);
        Ok(())
    }
}

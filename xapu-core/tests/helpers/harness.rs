//! Device construction and polling helpers

use super::fakes::{FakeClock, FakeIrq, RecordingMemory};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use xapu_core::regs::{
    set_mask, NV_PAPU_FECTL, NV_PAPU_FECTL_FEMETHMODE_FREE_RUNNING, NV_PAPU_SECTL,
    NV_PAPU_SECTL_XCNTMODE, NV_PAPU_SECTL_XCNTMODE_FRAME,
};
use xapu_core::{Apu, ApuConfig, ApuDeps, FrameGeometry, Mixer, MmioDevice};

/// Handles to the collaborators a test device was wired to
#[derive(Clone)]
pub struct TestBus {
    pub irq: Arc<FakeIrq>,
    pub memory: Arc<RecordingMemory>,
    pub clock: Arc<FakeClock>,
    pub global_lock: Arc<Mutex<()>>,
}

/// 256-sample (1024-byte) frames at 48 kHz, four-frame FIFO, one-frame host buffer
///
/// Watermarks come out at low = 1 frame, high = 3 frames.
pub fn fast_config() -> ApuConfig {
    ApuConfig {
        geometry: FrameGeometry {
            sample_rate: 48_000,
            samples_per_subframe: 32,
            subframes_per_frame: 8,
        },
        fifo_frames: 4,
        audio_samples: 256,
        volume_limit: 1.0,
        drain_retry_count: 10,
        drain_retry_sleep: Duration::from_micros(500),
    }
}

pub fn test_apu(config: ApuConfig, mixer: Box<dyn Mixer>) -> (Apu, TestBus) {
    let bus = TestBus {
        irq: Arc::new(FakeIrq::default()),
        memory: Arc::new(RecordingMemory::default()),
        clock: Arc::new(FakeClock::default()),
        global_lock: Arc::new(Mutex::new(())),
    };
    let deps = ApuDeps {
        irq: bus.irq.clone(),
        memory: bus.memory.clone(),
        clock: bus.clock.clone(),
        global_lock: bus.global_lock.clone(),
        mixer,
    };
    let apu = Apu::new(config, deps).unwrap();
    (apu, bus)
}

/// Frame counter on, front end free-running
pub fn start_frame_clock(apu: &Apu) {
    apu.write(
        NV_PAPU_SECTL as u64,
        4,
        set_mask(0, NV_PAPU_SECTL_XCNTMODE, NV_PAPU_SECTL_XCNTMODE_FRAME) as u64,
    );
    apu.write(NV_PAPU_FECTL as u64, 4, NV_PAPU_FECTL_FEMETHMODE_FREE_RUNNING as u64);
}

/// Poll `condition` every millisecond until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Interleaved little-endian i16 PCM to samples
pub fn decode_pcm(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

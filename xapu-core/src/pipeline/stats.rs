//! Worker utilization statistics
//!
//! The worker measures how much of each window it spends waiting on the
//! throttle versus producing frames. Results are published through
//! [`ApuStats`], a shared handle that debug and introspection code can hold
//! without reaching into the device.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::debug;

/// Length of one utilization window
pub const STATS_WINDOW_MS: u64 = 1000;

/// Counters published by the device
#[derive(Debug, Default)]
pub struct ApuStats {
    /// Sub-frames produced during the last completed window
    pub(crate) frames_processed: AtomicU64,
    /// `f32` bits; 1.0 means the worker never slept
    pub(crate) utilization: AtomicU32,
    pub(crate) irq_updates: AtomicU64,
    pub(crate) drain_calls: AtomicU64,
}

impl ApuStats {
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn utilization(&self) -> f32 {
        f32::from_bits(self.utilization.load(Ordering::Relaxed))
    }

    pub fn irq_updates(&self) -> u64 {
        self.irq_updates.load(Ordering::Relaxed)
    }

    pub fn drain_calls(&self) -> u64 {
        self.drain_calls.load(Ordering::Relaxed)
    }

    fn publish(&self, frames: u64, utilization: f32) {
        self.frames_processed.store(frames, Ordering::Relaxed);
        self.utilization.store(utilization.to_bits(), Ordering::Relaxed);
    }
}

/// Serializable copy of [`ApuStats`] plus FIFO state
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub frames_processed: u64,
    pub utilization: f32,
    pub irq_updates: u64,
    pub drain_calls: u64,
    pub monitor: crate::pipeline::monitor::MonitorStats,
}

/// Rolling window owned by the worker
#[derive(Debug, Clone, Default)]
pub struct UtilizationWindow {
    window_start_ms: u64,
    frame_count: u64,
    sleep_us: u64,
}

impl UtilizationWindow {
    /// Count one sub-frame, publishing and restarting the window when it
    /// has run for [`STATS_WINDOW_MS`]
    pub fn tick(&mut self, now_ms: u64, slept_us: u64, stats: &ApuStats) {
        self.sleep_us += slept_us;

        let elapsed_ms = now_ms.saturating_sub(self.window_start_ms);
        if elapsed_ms >= STATS_WINDOW_MS {
            let utilization = 1.0 - (self.sleep_us as f64 / (elapsed_ms * 1000) as f64);
            stats.publish(self.frame_count, utilization as f32);
            debug!(
                "APU window: {} sub-frames, utilization {:.3}",
                self.frame_count, utilization
            );

            self.window_start_ms = now_ms;
            self.frame_count = 0;
            self.sleep_us = 0;
        }
        self.frame_count += 1;
    }
}

//! Monotonic time utilities

use std::time::Instant;

/// Monotonic reference point
///
/// All pacing arithmetic is done in integer microseconds since an epoch taken
/// at device realization, so it never goes backwards with wall-clock changes.
#[derive(Debug, Clone, Copy)]
pub struct Epoch {
    start: Instant,
}

impl Epoch {
    /// Start a new epoch at the current instant
    pub fn now() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Microseconds elapsed since the epoch
    pub fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Milliseconds elapsed since the epoch
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Nanoseconds elapsed since the epoch
    pub fn elapsed_ns(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Self::now()
    }
}

//! Transfer FIFO between the frame worker and the host audio callback
//!
//! A fixed-capacity byte ring guarded by its own short-hold lock, separate
//! from the device lock. Nothing done under `ring` blocks or performs I/O:
//! every critical section is one occupancy read, one push or one pop.
//!
//! The watermarks are stored as atomics so the worker can read them without
//! the ring lock; they change only when a backend attaches.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Occupancy thresholds steering the throttle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Watermarks {
    /// At or below this, the producer free-runs
    pub low: usize,
    /// At or above this, the producer waits for the consumer
    pub high: usize,
}

impl Watermarks {
    /// Derive thresholds from the buffer geometry and the host buffer size
    ///
    /// `low` tracks one host drain, `high` three of them, both capped so at
    /// least one whole frame always fits above `high`.
    pub fn derive(capacity: usize, frame_bytes: usize, device_buffer_bytes: usize) -> Result<Self> {
        if frame_bytes == 0 {
            return Err(Error::Config("frame size must be non-zero".to_string()));
        }
        if capacity < 2 * frame_bytes {
            return Err(Error::Config(format!(
                "FIFO capacity {} bytes holds fewer than two {}-byte frames",
                capacity, frame_bytes
            )));
        }

        let drain = device_buffer_bytes.max(frame_bytes);
        let max_high = (capacity - frame_bytes).max(frame_bytes);
        let high = (3 * drain).min(max_high);
        let low = drain.min(high);

        let marks = Self { low, high };
        debug_assert!(marks.is_ordered(capacity, frame_bytes));
        Ok(marks)
    }

    /// `low <= high <= capacity - frame_bytes`
    pub fn is_ordered(&self, capacity: usize, frame_bytes: usize) -> bool {
        self.low <= self.high && self.high + frame_bytes <= capacity
    }

    /// Midpoint the deadline nudge steers towards
    pub fn mid(&self) -> usize {
        (self.low + self.high) / 2
    }
}

/// Point-in-time view of the FIFO
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MonitorStats {
    pub capacity: usize,
    pub frame_bytes: usize,
    pub queued_bytes: usize,
    pub device_buffer_bytes: usize,
    pub watermarks: Watermarks,
    pub frames_pushed: u64,
    pub underruns: u64,
}

/// Bounded byte FIFO plus its flow-control thresholds
pub struct Monitor {
    ring: Mutex<HeapRb<u8>>,
    capacity: usize,
    frame_bytes: usize,
    low: AtomicUsize,
    high: AtomicUsize,
    device_buffer_bytes: AtomicUsize,
    frames_pushed: AtomicU64,
    underruns: AtomicU64,
}

impl Monitor {
    /// Create a FIFO of `capacity` bytes, sizing the watermarks for a host
    /// buffer of `device_buffer_bytes` until a backend reports its own size
    pub fn new(capacity: usize, frame_bytes: usize, device_buffer_bytes: usize) -> Result<Self> {
        let marks = Watermarks::derive(capacity, frame_bytes, device_buffer_bytes)?;

        debug!(
            "Creating monitor FIFO: capacity={} bytes, frame={} bytes, low={}, high={}",
            capacity, frame_bytes, marks.low, marks.high
        );

        Ok(Self {
            ring: Mutex::new(HeapRb::new(capacity)),
            capacity,
            frame_bytes,
            low: AtomicUsize::new(marks.low),
            high: AtomicUsize::new(marks.high),
            device_buffer_bytes: AtomicUsize::new(device_buffer_bytes),
            frames_pushed: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn watermarks(&self) -> Watermarks {
        Watermarks {
            low: self.low.load(Ordering::Acquire),
            high: self.high.load(Ordering::Acquire),
        }
    }

    pub fn device_buffer_bytes(&self) -> usize {
        self.device_buffer_bytes.load(Ordering::Acquire)
    }

    /// Re-derive the watermarks for a negotiated host buffer size
    pub fn set_device_buffer_bytes(&self, device_buffer_bytes: usize) -> Result<Watermarks> {
        let marks = Watermarks::derive(self.capacity, self.frame_bytes, device_buffer_bytes)?;
        self.device_buffer_bytes.store(device_buffer_bytes, Ordering::Release);
        // high first so a concurrent reader never sees low > high while shrinking
        if marks.high >= self.high.load(Ordering::Acquire) {
            self.high.store(marks.high, Ordering::Release);
            self.low.store(marks.low, Ordering::Release);
        } else {
            self.low.store(marks.low, Ordering::Release);
            self.high.store(marks.high, Ordering::Release);
        }
        debug!(
            "Monitor watermarks for {}-byte host buffer: low={} high={}",
            device_buffer_bytes, marks.low, marks.high
        );
        Ok(marks)
    }

    /// Bytes currently queued
    pub fn queued_bytes(&self) -> usize {
        self.ring.lock().occupied_len()
    }

    /// Append one whole frame
    ///
    /// # Panics
    /// If less than `frame.len()` bytes are free. The throttle's high-watermark
    /// wait guarantees room; running out means the watermarks are wrong.
    pub fn push_frame(&self, frame: &[u8]) {
        {
            let mut ring = self.ring.lock();
            let vacant = ring.vacant_len();
            assert!(
                vacant >= frame.len(),
                "monitor FIFO overflow: {} bytes free, frame is {} bytes",
                vacant,
                frame.len()
            );
            ring.push_slice(frame);
        }
        self.frames_pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Pop up to `dst.len()` bytes, returning how many were copied
    ///
    /// The ring's storage may wrap, so this loops until either `dst` is full
    /// or the ring is empty.
    pub fn pop_into(&self, dst: &mut [u8]) -> usize {
        let mut ring = self.ring.lock();
        let mut copied = 0;
        while copied < dst.len() {
            let n = ring.pop_slice(&mut dst[copied..]);
            if n == 0 {
                break;
            }
            copied += n;
        }
        copied
    }

    /// Record a drain that had to zero-fill
    pub fn record_underrun(&self, missing: usize) {
        let count = self.underruns.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 1000 == 1 {
            warn!("Monitor underrun #{}: {} bytes zero-filled", count, missing);
        }
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            capacity: self.capacity,
            frame_bytes: self.frame_bytes,
            queued_bytes: self.queued_bytes(),
            device_buffer_bytes: self.device_buffer_bytes(),
            watermarks: self.watermarks(),
            frames_pushed: self.frames_pushed.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("capacity", &self.capacity)
            .field("frame_bytes", &self.frame_bytes)
            .field("watermarks", &self.watermarks())
            .finish()
    }
}

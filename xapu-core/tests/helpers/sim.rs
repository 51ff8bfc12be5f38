//! Simulated producer/consumer timeline for the throttle
//!
//! Time only moves when the throttle asks to wait. A wait ends at its
//! timeout or at the next consumer drain, whichever comes first, the same
//! way a drain's condvar broadcast wakes the real worker early. Producing a
//! frame takes no simulated time.

use xapu_core::pipeline::monitor::Watermarks;
use xapu_core::pipeline::throttle::{Throttle, ThrottleStep, WaitReason};

pub struct ThrottleSim {
    pub now_us: u64,
    pub queued: usize,
    pub frame_bytes: usize,
    pub capacity: usize,
    pub marks: Watermarks,
    pub throttle: Throttle,
    /// Consumer drains `drain_bytes` every `drain_period_us`; `None` = stalled
    pub drain_period_us: Option<u64>,
    pub drain_bytes: usize,
    next_drain_us: u64,
    pub frames_produced: u64,
    pub high_waits: u64,
    pub deadline_waits: u64,
    pub underruns: u64,
    pub max_queued: usize,
    /// Occupancy observed just before each push
    pub before_push: Vec<usize>,
}

impl ThrottleSim {
    pub fn new(capacity: usize, frame_bytes: usize, marks: Watermarks, frame_period_us: u64) -> Self {
        Self {
            now_us: 0,
            queued: 0,
            frame_bytes,
            capacity,
            marks,
            throttle: Throttle::new(frame_period_us),
            drain_period_us: None,
            drain_bytes: frame_bytes,
            next_drain_us: 0,
            frames_produced: 0,
            high_waits: 0,
            deadline_waits: 0,
            underruns: 0,
            max_queued: 0,
            before_push: Vec::new(),
        }
    }

    /// Consumer starts one period after t=0
    pub fn with_consumer(mut self, period_us: u64, drain_bytes: usize) -> Self {
        self.start_consumer(period_us, drain_bytes);
        self
    }

    /// Consumer's first drain lands one period from now
    pub fn start_consumer(&mut self, period_us: u64, drain_bytes: usize) {
        self.drain_period_us = Some(period_us);
        self.drain_bytes = drain_bytes;
        self.next_drain_us = self.now_us + period_us;
    }

    fn advance_to(&mut self, t: u64) {
        if let Some(period) = self.drain_period_us {
            while self.next_drain_us <= t {
                if self.queued < self.drain_bytes {
                    self.underruns += 1;
                }
                self.queued -= self.queued.min(self.drain_bytes);
                self.next_drain_us += period;
            }
        }
        self.now_us = t;
    }

    fn wake_time(&self, timeout_us: u64) -> u64 {
        let limit = self.now_us + timeout_us;
        match self.drain_period_us {
            Some(_) => limit.min(self.next_drain_us),
            None => limit,
        }
    }

    /// Run throttle passes and pushes until simulated time reaches `end_us`
    pub fn run_until(&mut self, end_us: u64) {
        while self.now_us < end_us {
            // One throttle pass
            loop {
                match self.throttle.poll(self.now_us, self.queued, self.marks, false) {
                    ThrottleStep::Done => break,
                    ThrottleStep::Wait { timeout, reason } => {
                        match reason {
                            WaitReason::HighWatermark => self.high_waits += 1,
                            WaitReason::Deadline => self.deadline_waits += 1,
                        }
                        let t = self.wake_time(timeout.as_micros() as u64);
                        self.advance_to(t);
                        if self.now_us >= end_us {
                            return;
                        }
                    }
                }
            }

            assert!(
                self.queued + self.frame_bytes <= self.capacity,
                "push at t={} would overflow: queued={} capacity={}",
                self.now_us,
                self.queued,
                self.capacity
            );
            self.before_push.push(self.queued);
            self.queued += self.frame_bytes;
            self.frames_produced += 1;
            self.max_queued = self.max_queued.max(self.queued);
        }
    }
}

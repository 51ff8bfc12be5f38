//! Frame pacing
//!
//! Hybrid watermark and deadline flow control, run once per pushed frame:
//!
//! 1. While the FIFO is at or above the high watermark, wait (bounded by one
//!    frame period) and re-read occupancy.
//! 2. Above the low watermark, pace against a wall-clock deadline that
//!    advances one frame period per frame, nudged by one microsecond towards
//!    the watermark midpoint.
//! 3. At or below the low watermark, free-run and restart the deadline.
//!
//! [`Throttle`] performs no I/O. The caller feeds it the current time and
//! occupancy, and performs whatever wait [`Throttle::poll`] asks for. The
//! frame worker drives it with a condition variable; tests drive it with a
//! simulated clock.

use crate::pipeline::monitor::Watermarks;
use std::time::Duration;
use tracing::trace;

/// Why the throttle wants the worker to wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// FIFO at or above the high watermark
    HighWatermark,
    /// Ahead of the frame deadline
    Deadline,
}

/// Next action for the caller of [`Throttle::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleStep {
    /// Block for at most `timeout`, then poll again
    Wait { timeout: Duration, reason: WaitReason },
    /// Pacing for this frame is complete
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    HighWatermark,
    Deadline { queued: usize, mid: usize },
}

#[derive(Debug, Clone, Copy)]
struct Pass {
    start_us: u64,
    phase: Phase,
}

/// Pacing state private to the frame worker
#[derive(Debug, Clone)]
pub struct Throttle {
    frame_period_us: u64,
    next_frame_deadline_us: Option<u64>,
    sleep_accumulated_us: u64,
    pass: Option<Pass>,
}

impl Throttle {
    pub fn new(frame_period_us: u64) -> Self {
        Self {
            frame_period_us,
            next_frame_deadline_us: None,
            sleep_accumulated_us: 0,
            pass: None,
        }
    }

    pub fn frame_period_us(&self) -> u64 {
        self.frame_period_us
    }

    /// Wall-clock target for the next frame, once established
    pub fn next_frame_deadline_us(&self) -> Option<u64> {
        self.next_frame_deadline_us
    }

    /// Forget the deadline and any pass in progress
    pub fn reset(&mut self) {
        self.next_frame_deadline_us = None;
        self.pass = None;
    }

    /// Whether a pass has started and not yet returned [`ThrottleStep::Done`]
    pub fn in_progress(&self) -> bool {
        self.pass.is_some()
    }

    /// Time spent inside completed passes since the last call
    pub fn take_sleep_accumulated_us(&mut self) -> u64 {
        std::mem::take(&mut self.sleep_accumulated_us)
    }

    /// Advance the pacing state machine
    ///
    /// `queued` is the FIFO occupancy read just before the call. It is only
    /// consulted while waiting on the high watermark; the deadline phase keeps
    /// the occupancy it decided on.
    pub fn poll(&mut self, now_us: u64, queued: usize, marks: Watermarks, exiting: bool) -> ThrottleStep {
        let pass = *self.pass.get_or_insert(Pass {
            start_us: now_us,
            phase: Phase::HighWatermark,
        });

        if exiting {
            return self.finish(pass, now_us);
        }

        match pass.phase {
            Phase::HighWatermark => {
                if queued >= marks.high {
                    return ThrottleStep::Wait {
                        timeout: Duration::from_micros(self.frame_period_us),
                        reason: WaitReason::HighWatermark,
                    };
                }

                if queued <= marks.low {
                    trace!("throttle: free-run (queued={} low={})", queued, marks.low);
                    self.next_frame_deadline_us = Some(pass.start_us);
                    return self.finish(pass, now_us);
                }

                let stale = match self.next_frame_deadline_us {
                    None => true,
                    Some(deadline) => now_us.saturating_sub(deadline) > self.frame_period_us,
                };
                if stale {
                    self.next_frame_deadline_us = Some(now_us);
                }

                let phase = Phase::Deadline {
                    queued,
                    mid: marks.mid(),
                };
                self.pass = Some(Pass { phase, ..pass });
                self.poll_deadline(pass.start_us, queued, marks.mid(), now_us)
            }
            Phase::Deadline { queued, mid } => self.poll_deadline(pass.start_us, queued, mid, now_us),
        }
    }

    fn poll_deadline(&mut self, start_us: u64, queued: usize, mid: usize, now_us: u64) -> ThrottleStep {
        let deadline = self.next_frame_deadline_us.unwrap_or(now_us);
        if deadline > now_us {
            return ThrottleStep::Wait {
                timeout: Duration::from_micros(deadline - now_us),
                reason: WaitReason::Deadline,
            };
        }

        let mut next = deadline + self.frame_period_us;
        if queued > mid {
            next += 1;
        } else if queued < mid {
            next -= 1;
        }
        trace!("throttle: deadline {} -> {} (queued={} mid={})", deadline, next, queued, mid);
        self.next_frame_deadline_us = Some(next);

        self.finish(
            Pass {
                start_us,
                phase: Phase::Deadline { queued, mid },
            },
            now_us,
        )
    }

    fn finish(&mut self, pass: Pass, now_us: u64) -> ThrottleStep {
        self.sleep_accumulated_us += now_us.saturating_sub(pass.start_us);
        self.pass = None;
        ThrottleStep::Done
    }
}

//! Frame worker loop
//!
//! One thread per device. It holds the device lock for its whole iteration
//! except while waiting on the condition variable and while handing off to
//! the global lock for interrupt recomputation. The global lock may be held
//! by whoever is shutting the device down, so the worker only polls for it
//! and gives up once `exiting` is set.
//!
//! A halted worker sleeps until a broadcast. Register writers broadcast
//! without the device lock, so the wait also times out every
//! [`HALT_RECHECK`]; a timed-out wait owes an interrupt update only if the
//! control registers changed meanwhile.
//!
//! ```text
//!   loop until exiting:
//!     halted after a wake or a control change? -> owe an interrupt update
//!     update owed?    -> drop device lock, take global lock, update_irq
//!     halted?         -> wait for a broadcast, re-evaluate
//!     frame boundary? -> throttle
//!     produce one sub-frame, push on the last sub-frame of a frame
//! ```

use crate::device::{ApuShared, DeviceCore};
use crate::pipeline::throttle::{ThrottleStep, WaitReason};
use crate::regs::{NV_PAPU_FECTL, NV_PAPU_SECTL};
use parking_lot::MutexGuard;
use std::time::Duration;
use tracing::{debug, trace};

/// How long one attempt at the global lock blocks before `exiting` is rechecked
const GLOBAL_LOCK_POLL: Duration = Duration::from_millis(2);

/// Upper bound on a halted worker's sleep when no broadcast arrives
const HALT_RECHECK: Duration = Duration::from_millis(500);

impl ApuShared {
    pub(crate) fn run_worker(&self) {
        debug!("APU frame worker started");

        let mut owe_on_halt = true;
        let mut core = self.core.lock();
        while !self.is_exiting() {
            if owe_on_halt && self.regs.pipeline_halted() {
                core.set_irq = true;
            }

            if core.set_irq {
                let updated = MutexGuard::unlocked(&mut core, || self.update_irq_under_global_lock());
                core.set_irq = false;
                if !updated {
                    break;
                }
            }

            if self.is_exiting() {
                break;
            }
            if self.regs.pipeline_halted() {
                let control = self.control_regs();
                let timed_out = self.cond.wait_for(&mut core, HALT_RECHECK).timed_out();
                owe_on_halt = !timed_out || self.control_regs() != control;
                continue;
            }
            owe_on_halt = true;

            self.throttle(&mut core);
            if self.is_exiting() {
                break;
            }
            self.produce_subframe(&mut core);
        }
        drop(core);
        debug!("APU frame worker exiting");
    }

    fn control_regs(&self) -> (u32, u32) {
        (self.regs.load(NV_PAPU_SECTL), self.regs.load(NV_PAPU_FECTL))
    }

    /// Returns false without updating if the device started exiting first
    fn update_irq_under_global_lock(&self) -> bool {
        while !self.is_exiting() {
            if let Some(_global) = self.bus.global_lock.try_lock_for(GLOBAL_LOCK_POLL) {
                self.update_irq();
                return true;
            }
        }
        false
    }

    fn throttle(&self, core: &mut MutexGuard<'_, DeviceCore>) {
        let per_frame = self.config.geometry.subframes_per_frame as u64;
        if core.subframe_div % per_frame != 0 {
            return;
        }

        loop {
            let step = core.throttle.poll(
                self.epoch.elapsed_us(),
                self.monitor.queued_bytes(),
                self.monitor.watermarks(),
                self.is_exiting(),
            );
            match step {
                ThrottleStep::Done => break,
                ThrottleStep::Wait { timeout, reason } => {
                    if reason == WaitReason::HighWatermark {
                        trace!("throttle: FIFO at high watermark, waiting up to {:?}", timeout);
                    }
                    self.cond.wait_for(core, timeout);
                }
            }
        }
    }

    fn produce_subframe(&self, core: &mut DeviceCore) {
        let per_frame = self.config.geometry.subframes_per_frame as u64;
        let slept_us = core.throttle.take_sleep_accumulated_us();

        let DeviceCore {
            mixer,
            mixbins,
            assembler,
            subframe_div,
            window,
            ..
        } = core;

        window.tick(self.epoch.elapsed_ms(), slept_us, &self.stats);

        mixbins.clear();
        mixer.render(&self.regs, mixbins);
        assembler.take_subframe((*subframe_div % per_frame) as usize, mixbins);

        if (*subframe_div + 1) % per_frame == 0 {
            let frame = assembler.finish(self.volume_limit());
            self.monitor.push_frame(frame);
        }

        *subframe_div = subframe_div.wrapping_add(1);
    }
}

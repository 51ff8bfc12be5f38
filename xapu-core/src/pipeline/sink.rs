//! Drain side of the transfer FIFO
//!
//! [`MonitorSink::fill`] runs on the host audio thread. It never takes the
//! device lock and never waits longer than its fixed retry budget; whatever
//! the FIFO cannot supply is zero-filled.

use crate::device::ApuShared;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Handle given to the host audio callback
#[derive(Clone)]
pub struct MonitorSink {
    shared: Arc<ApuShared>,
}

impl MonitorSink {
    pub(crate) fn new(shared: Arc<ApuShared>) -> Self {
        Self { shared }
    }

    /// Fill `dst` completely with queued PCM, or silence
    pub fn fill(&self, dst: &mut [u8]) {
        let shared = &self.shared;
        shared.stats.drain_calls.fetch_add(1, Ordering::Relaxed);

        if !shared.run_state().is_running() {
            dst.fill(0);
            return;
        }

        for _ in 0..shared.config.drain_retry_count {
            if shared.monitor.queued_bytes() >= dst.len() {
                break;
            }
            std::thread::sleep(shared.config.drain_retry_sleep);
            shared.cond.notify_all();
            if !shared.run_state().is_running() {
                dst.fill(0);
                return;
            }
        }

        let copied = shared.monitor.pop_into(dst);
        if copied < dst.len() {
            dst[copied..].fill(0);
            shared.monitor.record_underrun(dst.len() - copied);
        }

        shared.cond.notify_all();
    }

    /// Bytes currently waiting in the FIFO
    pub fn queued_bytes(&self) -> usize {
        self.shared.monitor.queued_bytes()
    }
}

impl std::fmt::Debug for MonitorSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorSink")
            .field("queued_bytes", &self.queued_bytes())
            .finish()
    }
}

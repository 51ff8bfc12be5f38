//! Recording bus collaborators

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use xapu_core::{GuestMemory, IrqLine, VirtualClock};

/// Interrupt line that remembers its level and counts updates
#[derive(Debug, Default)]
pub struct FakeIrq {
    level: AtomicBool,
    updates: AtomicU64,
}

impl FakeIrq {
    pub fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }
}

impl IrqLine for FakeIrq {
    fn set_level(&self, asserted: bool) {
        self.level.store(asserted, Ordering::SeqCst);
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}

/// Guest memory that logs every write
#[derive(Debug, Default)]
pub struct RecordingMemory {
    writes: Mutex<Vec<(u64, u32)>>,
}

impl RecordingMemory {
    pub fn writes(&self) -> Vec<(u64, u32)> {
        self.writes.lock().clone()
    }
}

impl GuestMemory for RecordingMemory {
    fn write_u32_le(&self, addr: u64, value: u32) {
        self.writes.lock().push((addr, value));
    }
}

/// Virtual clock set by the test
#[derive(Debug, Default)]
pub struct FakeClock {
    ns: AtomicU64,
}

impl FakeClock {
    pub fn set_ns(&self, ns: u64) {
        self.ns.store(ns, Ordering::SeqCst);
    }
}

impl VirtualClock for FakeClock {
    fn now_ns(&self) -> u64 {
        self.ns.load(Ordering::SeqCst)
    }
}

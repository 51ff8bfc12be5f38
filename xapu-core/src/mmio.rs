//! Guest-facing register and interrupt interface
//!
//! Reads and writes go straight to the atomic [`RegisterFile`] except for a
//! few addresses with side effects. Those are listed in small dispatch tables
//! below; adding a special register means adding one row.
//!
//! Callers on the MMIO path are expected to hold the machine's global lock,
//! which is also what the frame worker takes before recomputing interrupts.

use crate::device::ApuShared;
use crate::regs::*;
use std::sync::atomic::Ordering;
use tracing::trace;
use xapu_common::time::Epoch;

/// Interrupt line towards the PCI bus
pub trait IrqLine: Send + Sync {
    /// Assert (`true`) or deassert (`false`) the line
    fn set_level(&self, asserted: bool);
}

/// Emulated main memory, used by the notifier write
pub trait GuestMemory: Send + Sync {
    fn write_u32_le(&self, addr: u64, value: u32);
}

/// Machine virtual clock backing the global sample counter
pub trait VirtualClock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// Memory-mapped I/O surface exposed to the bus
pub trait MmioDevice {
    fn read(&self, addr: u64, size: u32) -> u64;
    fn write(&self, addr: u64, size: u32, value: u64);
}

/// Virtual clock that counts monotonic time since construction
#[derive(Debug, Default)]
pub struct MonotonicClock {
    epoch: Epoch,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VirtualClock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed_ns()
    }
}

/// Interrupt line that is not connected to anything
#[derive(Debug, Default)]
pub struct NullIrq;

impl IrqLine for NullIrq {
    fn set_level(&self, asserted: bool) {
        trace!("irq (unconnected) level={}", asserted);
    }
}

/// Guest memory sink that drops every write
#[derive(Debug, Default)]
pub struct NullMemory;

impl GuestMemory for NullMemory {
    fn write_u32_le(&self, addr: u64, value: u32) {
        trace!("guest memory (unconnected) [{:#x}] <- {:#010x}", addr, value);
    }
}

/// Fixed PCI identity of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciIdentity {
    pub vendor_id: u16,
    pub device_id: u16,
    pub revision: u8,
    pub class_code: u16,
    /// 1 = INTA
    pub interrupt_pin: u8,
    /// BAR0 memory window size in bytes
    pub bar0_size: u64,
}

pub const PCI_IDENTITY: PciIdentity = PciIdentity {
    vendor_id: 0x10DE,
    device_id: 0x01B0,
    revision: 177,
    class_code: 0x0401,
    interrupt_pin: 1,
    bar0_size: 0x80000,
};

type ReadHandler = fn(&ApuShared, u32) -> u64;
type WriteHandler = fn(&ApuShared, u32, u32);

const READ_HANDLERS: &[(u32, ReadHandler)] = &[(NV_PAPU_XGSCNT, read_xgscnt)];

const WRITE_HANDLERS: &[(u32, WriteHandler)] = &[
    (NV_PAPU_ISTS, write_ists),
    (NV_PAPU_FECTL, write_mode),
    (NV_PAPU_SECTL, write_mode),
    (NV_PAPU_FEMEMDATA, write_fememdata),
];

fn read_xgscnt(shared: &ApuShared, _addr: u32) -> u64 {
    shared.bus.clock.now_ns() / 100
}

fn write_ists(shared: &ApuShared, _addr: u32, value: u32) {
    // Bits written are the interrupts being acknowledged
    shared.regs.fetch_and(NV_PAPU_ISTS, !value);
    shared.update_irq();
    shared.cond.notify_all();
}

fn write_mode(shared: &ApuShared, addr: u32, value: u32) {
    shared.regs.store(addr, value);
    shared.cond.notify_all();
}

fn write_fememdata(shared: &ApuShared, addr: u32, value: u32) {
    // Completion notifier: the guest expects this value at FEMEMADDR
    let target = shared.regs.load(NV_PAPU_FEMEMADDR) as u64;
    shared.bus.memory.write_u32_le(target, value);
    shared.regs.store(addr, value);
}

impl ApuShared {
    /// Recompute the aggregate interrupt status and drive the line
    ///
    /// A trapped front end forces its status bit first. The line is driven
    /// exactly once per call.
    pub(crate) fn update_irq(&self) {
        let regs = &self.regs;
        if regs.load(NV_PAPU_FECTL) & NV_PAPU_FECTL_FEMETHMODE_TRAPPED != 0 {
            regs.fetch_or(NV_PAPU_ISTS, NV_PAPU_ISTS_FETINTSTS);
        }

        let ien = regs.load(NV_PAPU_IEN);
        let ists = regs.load(NV_PAPU_ISTS);
        if (ien & NV_PAPU_ISTS_GINTSTS) != 0 && ((ists & !NV_PAPU_ISTS_GINTSTS) & ien) != 0 {
            regs.fetch_or(NV_PAPU_ISTS, NV_PAPU_ISTS_GINTSTS);
            trace!("irq raise ien={:#010x} ists={:#010x}", ien, regs.load(NV_PAPU_ISTS));
            self.bus.irq.set_level(true);
        } else {
            regs.fetch_and(NV_PAPU_ISTS, !NV_PAPU_ISTS_GINTSTS);
            trace!("irq lower ien={:#010x} ists={:#010x}", ien, regs.load(NV_PAPU_ISTS));
            self.bus.irq.set_level(false);
        }
        self.stats.irq_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mmio_read(&self, addr: u64, size: u32) -> u64 {
        let value = match u32::try_from(addr) {
            Ok(a) => match READ_HANDLERS.iter().find(|(reg, _)| *reg == a) {
                Some((_, handler)) => handler(self, a),
                None if self.regs.contains(a) => self.regs.load(a) as u64,
                None => 0,
            },
            Err(_) => 0,
        };

        trace!("reg read addr={:#x} size={} value={:#x}", addr, size, value);
        value
    }

    pub(crate) fn mmio_write(&self, addr: u64, size: u32, value: u64) {
        trace!("reg write addr={:#x} size={} value={:#x}", addr, size, value);

        let Ok(a) = u32::try_from(addr) else {
            return;
        };
        let value = value as u32;
        match WRITE_HANDLERS.iter().find(|(reg, _)| *reg == a) {
            Some((_, handler)) => handler(self, a, value),
            None => self.regs.store(a, value),
        }
    }
}

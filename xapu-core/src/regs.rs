//! Register map and atomic register storage
//!
//! Addresses and bit masks are treated as opaque constants of the device's
//! register contract; only the handful the pipeline needs are named here.

use std::sync::atomic::{AtomicU32, Ordering};

/// Number of address-indexed register words backing the MMIO window
pub const REGS_SIZE: usize = 0x20000;

/// Interrupt status (write-1-to-clear)
pub const NV_PAPU_ISTS: u32 = 0x0000_1000;
/// Aggregate ("global") interrupt status bit
pub const NV_PAPU_ISTS_GINTSTS: u32 = 1 << 0;
/// Front-end trapped interrupt status bit
pub const NV_PAPU_ISTS_FETINTSTS: u32 = 1 << 4;

/// Interrupt enable
pub const NV_PAPU_IEN: u32 = 0x0000_1004;

/// Front-end control
pub const NV_PAPU_FECTL: u32 = 0x0000_1100;
pub const NV_PAPU_FECTL_FEMETHMODE: u32 = 0x0000_00E0;
pub const NV_PAPU_FECTL_FEMETHMODE_FREE_RUNNING: u32 = 0x0000_0000;
pub const NV_PAPU_FECTL_FEMETHMODE_HALTED: u32 = 0x0000_0080;
pub const NV_PAPU_FECTL_FEMETHMODE_TRAPPED: u32 = 0x0000_00E0;

/// Notifier target address for the front-end memory write
pub const NV_PAPU_FEMEMADDR: u32 = 0x0000_1324;
/// Notifier data; writing it stores the value at `FEMEMADDR` in guest memory
pub const NV_PAPU_FEMEMDATA: u32 = 0x0000_1334;

/// Setup engine control
pub const NV_PAPU_SECTL: u32 = 0x0000_2000;
pub const NV_PAPU_SECTL_XCNTMODE: u32 = 0x0000_0018;
pub const NV_PAPU_SECTL_XCNTMODE_OFF: u32 = 0;
pub const NV_PAPU_SECTL_XCNTMODE_FRAME: u32 = 3;

/// Global sample counter (read-only, derived from the virtual clock)
pub const NV_PAPU_XGSCNT: u32 = 0x0000_200C;

/// Extract a masked field, shifted down to bit 0
pub fn get_mask(value: u32, mask: u32) -> u32 {
    if mask == 0 {
        return 0;
    }
    (value & mask) >> mask.trailing_zeros()
}

/// Replace a masked field with `field`
pub fn set_mask(value: u32, mask: u32, field: u32) -> u32 {
    if mask == 0 {
        return value;
    }
    (value & !mask) | ((field << mask.trailing_zeros()) & mask)
}

/// Address-indexed array of atomic 32-bit registers
///
/// Shared between the MMIO path, the frame worker and the drain side without
/// a lock; every access is a single atomic operation.
pub struct RegisterFile {
    words: Box<[AtomicU32]>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::with_size(REGS_SIZE)
    }

    pub fn with_size(size: usize) -> Self {
        let words: Vec<AtomicU32> = (0..size).map(|_| AtomicU32::new(0)).collect();
        Self {
            words: words.into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Whether `addr` is backed by register storage
    pub fn contains(&self, addr: u32) -> bool {
        (addr as usize) < self.words.len()
    }

    /// Atomic load; out-of-range addresses read as 0
    pub fn load(&self, addr: u32) -> u32 {
        self.words
            .get(addr as usize)
            .map(|w| w.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Atomic store; out-of-range addresses are ignored
    pub fn store(&self, addr: u32, value: u32) {
        if let Some(w) = self.words.get(addr as usize) {
            w.store(value, Ordering::Release);
        }
    }

    pub fn fetch_or(&self, addr: u32, bits: u32) {
        if let Some(w) = self.words.get(addr as usize) {
            w.fetch_or(bits, Ordering::AcqRel);
        }
    }

    pub fn fetch_and(&self, addr: u32, bits: u32) {
        if let Some(w) = self.words.get(addr as usize) {
            w.fetch_and(bits, Ordering::AcqRel);
        }
    }

    /// Zero every register
    pub fn clear(&self) {
        for w in self.words.iter() {
            w.store(0, Ordering::Release);
        }
    }

    /// Non-zero registers as `(address, value)` pairs, in address order
    pub fn non_zero(&self) -> Vec<(u32, u32)> {
        self.words
            .iter()
            .enumerate()
            .filter_map(|(addr, w)| {
                let v = w.load(Ordering::Acquire);
                (v != 0).then_some((addr as u32, v))
            })
            .collect()
    }

    /// True when the frame clock is stopped or the front end is trapped/halted
    ///
    /// This is both the worker's Active→Waiting condition and the condition
    /// under which an interrupt recomputation is owed.
    pub fn pipeline_halted(&self) -> bool {
        let xcntmode = get_mask(self.load(NV_PAPU_SECTL), NV_PAPU_SECTL_XCNTMODE);
        let fectl = self.load(NV_PAPU_FECTL);
        xcntmode == NV_PAPU_SECTL_XCNTMODE_OFF
            || (fectl & NV_PAPU_FECTL_FEMETHMODE_TRAPPED) != 0
            || (fectl & NV_PAPU_FECTL_FEMETHMODE_HALTED) != 0
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterFile")
            .field("len", &self.words.len())
            .field("ists", &format_args!("{:#010x}", self.load(NV_PAPU_ISTS)))
            .field("ien", &format_args!("{:#010x}", self.load(NV_PAPU_IEN)))
            .field("fectl", &format_args!("{:#010x}", self.load(NV_PAPU_FECTL)))
            .field("sectl", &format_args!("{:#010x}", self.load(NV_PAPU_SECTL)))
            .finish()
    }
}

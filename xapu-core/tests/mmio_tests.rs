//! Register and interrupt interface tests
//!
//! Register sequences run with the global lock held, as a bus dispatch
//! would, so the frame worker's own interrupt updates cannot interleave.

mod helpers;

use helpers::{fast_config, start_frame_clock, test_apu, wait_until};
use serial_test::serial;
use std::time::{Duration, Instant};
use xapu_core::mixer::SilenceMixer;
use xapu_core::mmio::PCI_IDENTITY;
use xapu_core::regs::*;
use xapu_core::MmioDevice;

#[test]
fn test_plain_registers_store_and_load() {
    let (apu, _bus) = test_apu(fast_config(), Box::new(SilenceMixer));

    apu.write(0x3000, 4, 0xDEAD_BEEF);
    assert_eq!(apu.read(0x3000, 4), 0xDEAD_BEEF);

    // Upper bits of a wide write are dropped
    apu.write(0x3004, 4, 0x1_0000_0002);
    assert_eq!(apu.read(0x3004, 4), 2);
}

#[test]
fn test_out_of_range_reads_zero_and_writes_are_ignored() {
    let (apu, _bus) = test_apu(fast_config(), Box::new(SilenceMixer));

    let beyond = REGS_SIZE as u64 + 0x10;
    apu.write(beyond, 4, 7);
    assert_eq!(apu.read(beyond, 4), 0);
    assert_eq!(apu.read(u64::MAX, 4), 0);
    apu.write(u64::MAX, 4, 7);
}

#[test]
fn test_ists_write_clears_only_written_bits() {
    let (apu, bus) = test_apu(fast_config(), Box::new(SilenceMixer));
    let _global = bus.global_lock.lock();

    apu.write(NV_PAPU_IEN as u64, 4, (NV_PAPU_ISTS_GINTSTS | 0b110) as u64);
    // Hardware raises two sources
    apu.registers().store(NV_PAPU_ISTS, 0b110);

    apu.write(NV_PAPU_ISTS as u64, 4, 0b010);
    let ists = apu.read(NV_PAPU_ISTS as u64, 4) as u32;
    assert_eq!(ists & 0b110, 0b100);
    assert_ne!(ists & NV_PAPU_ISTS_GINTSTS, 0);
    assert!(bus.irq.level());

    apu.write(NV_PAPU_ISTS as u64, 4, 0b100);
    assert_eq!(apu.read(NV_PAPU_ISTS as u64, 4), 0);
    assert!(!bus.irq.level());
}

#[test]
fn test_irq_needs_global_enable() {
    let (apu, bus) = test_apu(fast_config(), Box::new(SilenceMixer));
    let _global = bus.global_lock.lock();

    apu.write(NV_PAPU_IEN as u64, 4, 0b100);
    apu.registers().store(NV_PAPU_ISTS, 0b100);
    apu.write(NV_PAPU_ISTS as u64, 4, 0);

    assert!(!bus.irq.level());
    assert_eq!(apu.read(NV_PAPU_ISTS as u64, 4) as u32 & NV_PAPU_ISTS_GINTSTS, 0);
}

#[test]
fn test_pending_source_must_be_enabled() {
    let (apu, bus) = test_apu(fast_config(), Box::new(SilenceMixer));
    let _global = bus.global_lock.lock();

    apu.write(NV_PAPU_IEN as u64, 4, (NV_PAPU_ISTS_GINTSTS | 0b010) as u64);
    apu.registers().store(NV_PAPU_ISTS, 0b100);
    apu.write(NV_PAPU_ISTS as u64, 4, 0);

    assert!(!bus.irq.level());
}

#[test]
fn test_trapped_front_end_forces_status_bit() {
    let (apu, bus) = test_apu(fast_config(), Box::new(SilenceMixer));
    let _global = bus.global_lock.lock();

    apu.write(NV_PAPU_IEN as u64, 4, (NV_PAPU_ISTS_GINTSTS | NV_PAPU_ISTS_FETINTSTS) as u64);
    apu.write(NV_PAPU_FECTL as u64, 4, NV_PAPU_FECTL_FEMETHMODE_TRAPPED as u64);
    apu.write(NV_PAPU_ISTS as u64, 4, 0);

    let ists = apu.read(NV_PAPU_ISTS as u64, 4) as u32;
    assert_ne!(ists & NV_PAPU_ISTS_FETINTSTS, 0);
    assert_ne!(ists & NV_PAPU_ISTS_GINTSTS, 0);
    assert!(bus.irq.level());
}

#[test]
fn test_line_driven_once_per_recomputation() {
    let (apu, bus) = test_apu(fast_config(), Box::new(SilenceMixer));
    let _global = bus.global_lock.lock();

    let before = bus.irq.updates();
    apu.write(NV_PAPU_ISTS as u64, 4, 0);
    assert_eq!(bus.irq.updates(), before + 1);
    apu.write(NV_PAPU_ISTS as u64, 4, 0);
    assert_eq!(bus.irq.updates(), before + 2);
}

#[test]
fn test_halted_worker_recomputes_interrupts() {
    let (apu, bus) = test_apu(fast_config(), Box::new(SilenceMixer));

    {
        let _global = bus.global_lock.lock();
        apu.write(NV_PAPU_IEN as u64, 4, (NV_PAPU_ISTS_GINTSTS | NV_PAPU_ISTS_FETINTSTS) as u64);
        apu.write(NV_PAPU_FECTL as u64, 4, NV_PAPU_FECTL_FEMETHMODE_TRAPPED as u64);
    }

    // No ISTS write: the worker notices the trap on its own
    assert!(wait_until(Duration::from_secs(2), || bus.irq.level()));
    let ists = apu.read(NV_PAPU_ISTS as u64, 4) as u32;
    assert_ne!(ists & NV_PAPU_ISTS_FETINTSTS, 0);
}

#[test]
#[serial]
fn test_idle_halted_worker_leaves_line_alone() {
    let (_apu, bus) = test_apu(fast_config(), Box::new(SilenceMixer));

    // One recomputation on entering the halt, then nothing until a write
    assert!(wait_until(Duration::from_secs(2), || bus.irq.updates() >= 1));
    std::thread::sleep(Duration::from_millis(30));
    let settled = bus.irq.updates();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(bus.irq.updates(), settled);
}

#[test]
#[serial]
fn test_mode_write_wakes_halted_worker() {
    let (apu, _bus) = test_apu(fast_config(), Box::new(SilenceMixer));
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(apu.queued_bytes(), 0);

    let start = Instant::now();
    start_frame_clock(&apu);
    assert!(wait_until(Duration::from_secs(2), || apu.queued_bytes() > 0));
    assert!(start.elapsed() < Duration::from_millis(150), "first frame after {:?}", start.elapsed());
}

#[test]
#[serial]
fn test_ists_write_wakes_halted_worker() {
    let (apu, bus) = test_apu(fast_config(), Box::new(SilenceMixer));
    assert!(wait_until(Duration::from_secs(2), || bus.irq.updates() >= 1));
    std::thread::sleep(Duration::from_millis(30));
    let before = bus.irq.updates();

    // The write recomputes once itself, the woken worker once more
    let start = Instant::now();
    apu.write(NV_PAPU_ISTS as u64, 4, 0);
    assert!(wait_until(Duration::from_secs(2), || bus.irq.updates() >= before + 2));
    assert!(start.elapsed() < Duration::from_millis(150), "worker woke after {:?}", start.elapsed());
}

#[test]
fn test_notifier_write_stores_into_guest_memory() {
    let (apu, bus) = test_apu(fast_config(), Box::new(SilenceMixer));

    apu.write(NV_PAPU_FEMEMADDR as u64, 4, 0x0012_3400);
    apu.write(NV_PAPU_FEMEMDATA as u64, 4, 0xCAFE_BABE);

    assert_eq!(bus.memory.writes(), vec![(0x0012_3400, 0xCAFE_BABE)]);
    assert_eq!(apu.read(NV_PAPU_FEMEMDATA as u64, 4), 0xCAFE_BABE);
}

#[test]
fn test_global_sample_counter_follows_virtual_clock() {
    let (apu, bus) = test_apu(fast_config(), Box::new(SilenceMixer));

    bus.clock.set_ns(12_345);
    assert_eq!(apu.read(NV_PAPU_XGSCNT as u64, 4), 123);

    bus.clock.set_ns(1_000_000_000);
    assert_eq!(apu.read(NV_PAPU_XGSCNT as u64, 4), 10_000_000);

    // Writes land in storage but reads always come from the clock
    apu.write(NV_PAPU_XGSCNT as u64, 4, 5);
    assert_eq!(apu.read(NV_PAPU_XGSCNT as u64, 4), 10_000_000);
}

#[test]
fn test_global_sample_counter_is_not_truncated() {
    let (apu, bus) = test_apu(fast_config(), Box::new(SilenceMixer));

    // About 5.8 days of uptime: the 100 ns count no longer fits in 32 bits
    bus.clock.set_ns(500_000_000_000_000);
    let count = apu.read(NV_PAPU_XGSCNT as u64, 8);
    assert_eq!(count, 5_000_000_000_000);
    assert!(count > u32::MAX as u64);
}

#[test]
fn test_pci_identity() {
    let (apu, _bus) = test_apu(fast_config(), Box::new(SilenceMixer));
    let id = apu.pci_identity();
    assert_eq!(id, PCI_IDENTITY);
    assert_eq!((id.vendor_id, id.device_id, id.revision), (0x10DE, 0x01B0, 177));
    assert_eq!(id.bar0_size, 0x80000);
}

//! APU device object
//!
//! [`Apu`] owns the shared device state, the frame worker thread and the
//! snapshot freeze slot. State touched from more than one thread lives in
//! [`ApuShared`]:
//!
//! - `regs`: atomic register file, no lock
//! - `core`: the device lock, guarding everything the worker mutates
//! - `cond`: wakes the worker on mode changes, drains, freezes and exit
//! - `monitor`: the transfer FIFO, behind its own short-hold lock
//!
//! Lock order is `global_lock` before `core`, never the reverse: the worker
//! drops `core` before taking the global lock to recompute interrupts.

use crate::config::ApuConfig;
use crate::error::{Error, Result};
use crate::mmio::{GuestMemory, IrqLine, MmioDevice, MonotonicClock, NullIrq, NullMemory, PciIdentity, VirtualClock, PCI_IDENTITY};
use crate::pipeline::frame::{FrameAssembler, MixBins, Mixer};
use crate::pipeline::monitor::{Monitor, Watermarks};
use crate::pipeline::sink::MonitorSink;
use crate::pipeline::stats::{ApuStats, StatsSnapshot, UtilizationWindow};
use crate::pipeline::throttle::Throttle;
use crate::regs::RegisterFile;
use crate::snapshot::{Freeze, FreezeGuard};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, ThreadId};
use tracing::{debug, error, info, warn};
use xapu_common::time::Epoch;

/// Machine run state as seen by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[repr(u8)]
pub enum RunState {
    /// Created, not yet started
    #[default]
    Prelaunch = 0,
    Running = 1,
    Paused = 2,
    /// Snapshot being written; entering this state freezes the device
    SaveVm = 3,
    /// Snapshot being read
    RestoreVm = 4,
    Shutdown = 5,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::Paused,
            3 => RunState::SaveVm,
            4 => RunState::RestoreVm,
            5 => RunState::Shutdown,
            _ => RunState::Prelaunch,
        }
    }

    pub fn is_running(self) -> bool {
        self == RunState::Running
    }
}

/// Collaborators the device is wired to at realization
pub struct ApuDeps {
    pub irq: Arc<dyn IrqLine>,
    pub memory: Arc<dyn GuestMemory>,
    pub clock: Arc<dyn VirtualClock>,
    /// The machine's global lock, taken around interrupt recomputation
    pub global_lock: Arc<Mutex<()>>,
    pub mixer: Box<dyn Mixer>,
}

impl ApuDeps {
    /// Device with no machine around it: unconnected IRQ and memory, a
    /// monotonic virtual clock and a private global lock
    pub fn detached(mixer: Box<dyn Mixer>) -> Self {
        Self {
            irq: Arc::new(NullIrq),
            memory: Arc::new(NullMemory),
            clock: Arc::new(MonotonicClock::new()),
            global_lock: Arc::new(Mutex::new(())),
            mixer,
        }
    }
}

pub(crate) struct Bus {
    pub(crate) irq: Arc<dyn IrqLine>,
    pub(crate) memory: Arc<dyn GuestMemory>,
    pub(crate) clock: Arc<dyn VirtualClock>,
    pub(crate) global_lock: Arc<Mutex<()>>,
}

/// State guarded by the device lock
pub(crate) struct DeviceCore {
    pub(crate) mixer: Box<dyn Mixer>,
    pub(crate) mixbins: MixBins,
    pub(crate) assembler: FrameAssembler,
    pub(crate) subframe_div: u64,
    /// Interrupt recomputation owed by the worker
    pub(crate) set_irq: bool,
    pub(crate) throttle: Throttle,
    pub(crate) window: UtilizationWindow,
}

pub(crate) struct ApuShared {
    pub(crate) config: ApuConfig,
    pub(crate) regs: RegisterFile,
    pub(crate) core: Arc<Mutex<DeviceCore>>,
    pub(crate) cond: Condvar,
    pub(crate) exiting: AtomicBool,
    pub(crate) frozen: AtomicBool,
    pub(crate) monitor: Monitor,
    pub(crate) stats: Arc<ApuStats>,
    pub(crate) bus: Bus,
    pub(crate) epoch: Epoch,
    run_state: AtomicU8,
    volume_limit: AtomicU32,
    pub(crate) worker_thread: OnceLock<ThreadId>,
}

impl ApuShared {
    pub(crate) fn run_state(&self) -> RunState {
        RunState::from_u8(self.run_state.load(Ordering::Acquire))
    }

    pub(crate) fn volume_limit(&self) -> f32 {
        f32::from_bits(self.volume_limit.load(Ordering::Relaxed))
    }

    pub(crate) fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    /// Clear registers and cached execution state with the device lock held
    ///
    /// The FIFO, its contents and the worker thread survive a reset.
    pub(crate) fn reset_locked(&self, core: &mut DeviceCore) {
        self.regs.clear();
        core.mixer.reset();
        core.set_irq = false;
        core.throttle.reset();
        self.cond.notify_one();
        debug!("APU reset");
    }
}

/// Emulated audio processing unit
pub struct Apu {
    shared: Arc<ApuShared>,
    worker: Option<JoinHandle<()>>,
    /// Freeze held between the split snapshot hooks
    pub(crate) freeze_slot: Mutex<Option<Freeze>>,
}

impl Apu {
    /// Realize the device and start its frame worker
    pub fn new(config: ApuConfig, deps: ApuDeps) -> Result<Self> {
        config.validate()?;

        let geometry = config.geometry;
        let monitor = Monitor::new(
            config.fifo_capacity_bytes(),
            geometry.frame_bytes(),
            config.device_buffer_bytes(),
        )?;

        let core = DeviceCore {
            mixer: deps.mixer,
            mixbins: MixBins::new(geometry.samples_per_subframe),
            assembler: FrameAssembler::new(geometry),
            subframe_div: 0,
            set_irq: false,
            throttle: Throttle::new(geometry.frame_period_us()),
            window: UtilizationWindow::default(),
        };

        let shared = Arc::new(ApuShared {
            volume_limit: AtomicU32::new(config.volume_limit.to_bits()),
            config,
            regs: RegisterFile::new(),
            core: Arc::new(Mutex::new(core)),
            cond: Condvar::new(),
            exiting: AtomicBool::new(false),
            frozen: AtomicBool::new(false),
            monitor,
            stats: Arc::new(ApuStats::default()),
            bus: Bus {
                irq: deps.irq,
                memory: deps.memory,
                clock: deps.clock,
                global_lock: deps.global_lock,
            },
            epoch: Epoch::default(),
            run_state: AtomicU8::new(RunState::Prelaunch as u8),
            worker_thread: OnceLock::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("xapu.frame_thread".to_string())
            .spawn(move || worker_shared.run_worker())?;
        let _ = shared.worker_thread.set(worker.thread().id());

        info!(
            "APU realized: {} frames x {} bytes FIFO, frame period {}us",
            shared.config.fifo_frames,
            geometry.frame_bytes(),
            geometry.frame_period_us()
        );

        Ok(Self {
            shared,
            worker: Some(worker),
            freeze_slot: Mutex::new(None),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<ApuShared> {
        &self.shared
    }

    pub fn config(&self) -> &ApuConfig {
        &self.shared.config
    }

    pub fn pci_identity(&self) -> PciIdentity {
        PCI_IDENTITY
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.shared.regs
    }

    /// Drain-side handle for the host audio callback
    pub fn sink(&self) -> MonitorSink {
        MonitorSink::new(Arc::clone(&self.shared))
    }

    /// Size the watermarks for a host buffer the backend actually negotiated
    pub fn attach_backend(&self, device_buffer_bytes: usize) -> Result<Watermarks> {
        let marks = self.shared.monitor.set_device_buffer_bytes(device_buffer_bytes)?;
        self.shared.cond.notify_all();
        Ok(marks)
    }

    pub fn watermarks(&self) -> Watermarks {
        self.shared.monitor.watermarks()
    }

    pub fn queued_bytes(&self) -> usize {
        self.shared.monitor.queued_bytes()
    }

    pub fn run_state(&self) -> RunState {
        self.shared.run_state()
    }

    /// Record a machine run-state change
    ///
    /// Entering [`RunState::SaveVm`] freezes the device (the pre-save hook).
    /// If that freeze fails the previous run state is restored and the
    /// error returned. The matching release is [`crate::snapshot::SnapshotHooks::post_save`].
    pub fn set_run_state(&self, state: RunState) -> Result<()> {
        let previous = RunState::from_u8(self.shared.run_state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            debug!("APU run state {:?} -> {:?}", previous, state);
        }
        self.shared.cond.notify_all();

        if state == RunState::SaveVm {
            if let Err(e) = self.freeze_into_slot() {
                // Failed pre-save: the machine stays where it was
                self.shared.run_state.store(previous as u8, Ordering::Release);
                warn!("APU could not freeze for save: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn volume_limit(&self) -> f32 {
        self.shared.volume_limit()
    }

    /// Change the soft volume limit; applies from the next pushed frame
    pub fn set_volume_limit(&self, limit: f32) -> Result<()> {
        if !limit.is_finite() {
            return Err(Error::Config(format!("volume limit {} is not finite", limit)));
        }
        self.shared.volume_limit.store(limit.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Shared statistics handle for debug and introspection code
    pub fn stats(&self) -> Arc<ApuStats> {
        Arc::clone(&self.shared.stats)
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        let stats = &self.shared.stats;
        StatsSnapshot {
            frames_processed: stats.frames_processed(),
            utilization: stats.utilization(),
            irq_updates: stats.irq_updates(),
            drain_calls: stats.drain_calls(),
            monitor: self.shared.monitor.stats(),
        }
    }

    /// Guest or machine reset
    ///
    /// Blocks until the worker releases the device lock. Use
    /// [`FreezeGuard::reset`] when a freeze is already held.
    pub fn reset(&self) {
        let mut core = self.shared.core.lock();
        self.shared.reset_locked(&mut core);
    }

    /// Stop the worker at its next lock boundary until the guard drops
    ///
    /// Must not be called from the frame worker, or while this device is
    /// already frozen.
    pub fn begin_freeze(&self) -> Result<FreezeGuard<'_>> {
        Freeze::acquire(&self.shared).map(FreezeGuard::new)
    }
}

impl MmioDevice for Apu {
    fn read(&self, addr: u64, size: u32) -> u64 {
        self.shared.mmio_read(addr, size)
    }

    fn write(&self, addr: u64, size: u32, value: u64) {
        self.shared.mmio_write(addr, size, value)
    }
}

impl Drop for Apu {
    fn drop(&mut self) {
        // Release a snapshot freeze left behind so the worker can observe exit
        if self.freeze_slot.get_mut().take().is_some() {
            warn!("APU dropped while frozen for a snapshot");
        }

        self.shared.exiting.store(true, Ordering::Release);
        // Pass through the device lock so the worker is either before its
        // exit check or already parked on the condvar when we notify
        drop(self.shared.core.lock());
        self.shared.cond.notify_all();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("APU frame worker panicked");
            }
        }
        debug!("APU shut down");
    }
}

impl std::fmt::Debug for Apu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Apu")
            .field("run_state", &self.run_state())
            .field("regs", &self.shared.regs)
            .field("monitor", &self.shared.monitor)
            .finish()
    }
}

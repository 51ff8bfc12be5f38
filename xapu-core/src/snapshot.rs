//! Snapshot freeze protocol
//!
//! Holding the device lock stops the frame worker at its next lock boundary,
//! so registers and mixer state can be read or replaced as one consistent
//! image. A freeze is an RAII value: taking it locks, dropping it wakes the
//! worker and unlocks.
//!
//! Two ways to hold one:
//!
//! - [`Apu::begin_freeze`] returns a scoped [`FreezeGuard`].
//! - [`SnapshotHooks`] splits the freeze across the snapshot framework's
//!   callbacks; the device keeps it in a slot between `pre_*` and `post_*`.
//!
//! Hooks must be called from the machine's coordinating thread, never from
//! the frame worker or the audio callback.

use crate::device::{Apu, ApuShared, DeviceCore};
use crate::error::{Error, Result};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::RawMutex;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// Current snapshot layout version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized device image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApuSnapshot {
    pub version: u32,
    /// Non-zero registers as `(address, value)`
    pub registers: Vec<(u32, u32)>,
    /// Opaque mixing stage state
    pub mixer: Vec<u8>,
}

impl ApuSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = serde_json::from_slice(bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Snapshot(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot)
    }
}

/// Device lock held on behalf of a snapshot
pub(crate) struct Freeze {
    core: ArcMutexGuard<RawMutex, DeviceCore>,
    shared: Arc<ApuShared>,
}

impl Freeze {
    pub(crate) fn acquire(shared: &Arc<ApuShared>) -> Result<Self> {
        if shared.worker_thread.get() == Some(&std::thread::current().id()) {
            return Err(Error::FreezeFromWorker);
        }
        if shared.frozen.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyFrozen);
        }

        let core = shared.core.lock_arc();
        debug!("APU frozen");
        Ok(Self {
            core,
            shared: Arc::clone(shared),
        })
    }

    fn save(&self) -> ApuSnapshot {
        ApuSnapshot {
            version: SNAPSHOT_VERSION,
            registers: self.shared.regs.non_zero(),
            mixer: self.core.mixer.save_state(),
        }
    }

    fn load(&mut self, snapshot: &ApuSnapshot) -> Result<()> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Snapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        if let Some((addr, _)) = snapshot
            .registers
            .iter()
            .find(|(addr, _)| !self.shared.regs.contains(*addr))
        {
            return Err(Error::Snapshot(format!("register {:#x} out of range", addr)));
        }

        let regs = &self.shared.regs;
        regs.clear();
        for &(addr, value) in &snapshot.registers {
            regs.store(addr, value);
        }
        self.core.mixer.load_state(&snapshot.mixer)?;

        info!("APU state loaded ({} registers)", snapshot.registers.len());
        Ok(())
    }

    fn reset(&mut self) {
        self.shared.reset_locked(&mut self.core);
    }
}

impl Drop for Freeze {
    fn drop(&mut self) {
        self.shared.frozen.store(false, Ordering::Release);
        self.shared.cond.notify_all();
        debug!("APU thawed");
    }
}

/// Scoped freeze returned by [`Apu::begin_freeze`]
pub struct FreezeGuard<'a> {
    freeze: Freeze,
    _apu: PhantomData<&'a Apu>,
}

impl<'a> FreezeGuard<'a> {
    pub(crate) fn new(freeze: Freeze) -> Self {
        Self {
            freeze,
            _apu: PhantomData,
        }
    }

    /// Capture registers and mixer state
    pub fn save(&self) -> ApuSnapshot {
        self.freeze.save()
    }

    /// Replace registers and mixer state
    ///
    /// Registers absent from the snapshot end up zero.
    pub fn load(&mut self, snapshot: &ApuSnapshot) -> Result<()> {
        self.freeze.load(snapshot)
    }

    /// Reset the device without giving up the freeze
    pub fn reset(&mut self) {
        self.freeze.reset()
    }
}

impl std::fmt::Debug for FreezeGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreezeGuard").finish_non_exhaustive()
    }
}

/// Callbacks invoked by the VM snapshot framework, in order
/// `pre_save, save, post_save` or `pre_load, load, post_load`
pub trait SnapshotHooks {
    /// Freeze the device before any state is written
    fn pre_save(&self) -> Result<()>;
    fn save(&self) -> Result<ApuSnapshot>;
    /// Wake the worker and release the freeze
    fn post_save(&self) -> Result<()>;
    /// Reset and freeze the device before state is read
    fn pre_load(&self) -> Result<()>;
    fn load(&self, snapshot: &ApuSnapshot) -> Result<()>;
    /// Wake the worker and release the freeze
    fn post_load(&self) -> Result<()>;
}

impl Apu {
    pub(crate) fn freeze_into_slot(&self) -> Result<()> {
        let mut slot = self.freeze_slot.lock();
        if slot.is_some() {
            return Err(Error::AlreadyFrozen);
        }
        *slot = Some(Freeze::acquire(self.shared())?);
        Ok(())
    }

    fn release_slot(&self) -> Result<()> {
        let freeze = self.freeze_slot.lock().take().ok_or(Error::NotFrozen)?;
        drop(freeze);
        Ok(())
    }
}

impl SnapshotHooks for Apu {
    fn pre_save(&self) -> Result<()> {
        self.freeze_into_slot()
    }

    fn save(&self) -> Result<ApuSnapshot> {
        let slot = self.freeze_slot.lock();
        let freeze = slot.as_ref().ok_or(Error::NotFrozen)?;
        Ok(freeze.save())
    }

    fn post_save(&self) -> Result<()> {
        self.release_slot()
    }

    fn pre_load(&self) -> Result<()> {
        let mut slot = self.freeze_slot.lock();
        if slot.is_some() {
            return Err(Error::AlreadyFrozen);
        }
        let mut freeze = Freeze::acquire(self.shared())?;
        freeze.reset();
        *slot = Some(freeze);
        Ok(())
    }

    fn load(&self, snapshot: &ApuSnapshot) -> Result<()> {
        let mut slot = self.freeze_slot.lock();
        let freeze = slot.as_mut().ok_or(Error::NotFrozen)?;
        freeze.load(snapshot)
    }

    fn post_load(&self) -> Result<()> {
        self.release_slot()
    }
}

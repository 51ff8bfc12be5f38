//! # xapu-core
//!
//! Emulated audio processing unit: a memory-mapped device that renders audio
//! frames on a dedicated worker thread, paces them against wall-clock time,
//! and hands them through a bounded FIFO to a real-time host audio callback.
//!
//! **Architecture:** three execution contexts share one device.
//!
//! - Guest MMIO ([`mmio`]) updates atomic registers and interrupt state and
//!   wakes the worker.
//! - The frame worker ([`pipeline`]) renders, throttles and pushes frames.
//! - The host audio callback ([`pipeline::sink`]) drains the FIFO and never
//!   blocks beyond a fixed retry budget.
//!
//! Snapshots freeze the worker through [`snapshot`].

pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod mixer;
pub mod mmio;
pub mod pipeline;
pub mod regs;
pub mod snapshot;

pub use config::{ApuConfig, FrameGeometry};
pub use device::{Apu, ApuDeps, RunState};
pub use error::{Error, Result};
pub use mmio::{GuestMemory, IrqLine, MmioDevice, VirtualClock};
pub use pipeline::{Mixer, MonitorSink, Watermarks};
pub use snapshot::{ApuSnapshot, FreezeGuard, SnapshotHooks};

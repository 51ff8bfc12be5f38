//! Producer/consumer audio pipeline
//!
//! - [`frame`]: mixing stage seam and frame assembly
//! - [`throttle`]: pacing of the producer against the consumer
//! - [`monitor`]: the transfer FIFO and its watermarks
//! - [`sink`]: the drain callback run by the host audio thread
//! - [`stats`]: worker utilization
//! - `worker`: the frame worker loop

pub mod frame;
pub mod monitor;
pub mod sink;
pub mod stats;
pub mod throttle;
mod worker;

pub use frame::{MixBins, Mixer};
pub use monitor::{Monitor, Watermarks};
pub use sink::MonitorSink;
pub use stats::{ApuStats, StatsSnapshot};
pub use throttle::{Throttle, ThrottleStep, WaitReason};

//! Test helper modules for xapu-core integration tests
//!
//! - fakes: bus collaborators that record what the device does to them
//! - mixers: deterministic mixing stages
//! - harness: device construction and polling helpers
//! - sim: simulated clock and consumer for driving the throttle

#![allow(dead_code)]

pub mod fakes;
pub mod harness;
pub mod mixers;
pub mod sim;

pub use fakes::{FakeClock, FakeIrq, RecordingMemory};
pub use harness::{decode_pcm, fast_config, start_frame_clock, test_apu, wait_until, TestBus};
pub use mixers::{ConstMixer, CountingMixer};
pub use sim::ThrottleSim;

//! # xapu Common Library
//!
//! Shared, device-independent support for the xapu crates:
//! - Configuration loading (TOML + environment overrides)
//! - Tunable parameter metadata and validation
//! - Monotonic time helpers
//! - Common error type

pub mod config;
pub mod error;
pub mod params;
pub mod time;

pub use error::{Error, Result};

//! Error types for xapu-core
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for the APU device
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration rejected at realization
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared configuration layer errors
    #[error(transparent)]
    Common(#[from] xapu_common::Error),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Snapshot content could not be applied
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Snapshot encode/decode errors
    #[error("Snapshot serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Freeze requested while one is already held
    #[error("Device is already frozen")]
    AlreadyFrozen,

    /// Freeze ended (or frozen-only operation attempted) without a freeze held
    #[error("Device is not frozen")]
    NotFrozen,

    /// Freeze requested from the frame worker itself
    #[error("Freeze cannot be requested from the frame worker thread")]
    FreezeFromWorker,

    /// Worker thread spawn and other I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using xapu-core Error
pub type Result<T> = std::result::Result<T, Error>;

//! Common error types for xapu

use thiserror::Error;

/// Common result type for xapu support operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading or validating shared configuration
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed TOML configuration file
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid parameter value
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

//! Error types for the slidelog crate.

use thiserror::Error;

/// Main error type for slidelog operations.
#[derive(Error, Debug)]
pub enum SlidelogError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A quota with a zero limit or zero window
    #[error("Invalid quota: {0}")]
    InvalidQuota(String),

    /// A policy name with no configured quota
    #[error("Unknown rate limit policy: {0}")]
    UnknownPolicy(String),

    /// Errors from the layered configuration loader
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for slidelog operations.
pub type Result<T> = std::result::Result<T, SlidelogError>;

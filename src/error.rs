//! Error types for the Argus collection core
//!
//! This module provides structured error handling using thiserror for
//! error definitions and anyhow for error propagation at the edges.

use thiserror::Error;

/// Main error type for Argus operations
#[derive(Error, Debug)]
pub enum ArgusError {
    /// Querying a record source failed
    #[error("Source query error: {0}")]
    Source(String),

    /// Publishing to the sink failed
    #[error("Sink error: {0}")]
    Sink(String),

    /// Key-value store read or write failed
    #[error("Store error: {0}")]
    Store(String),

    /// Salt generation or keyed hashing failed
    #[error("Hash error: {0}")]
    Hash(String),

    /// A sampling provider is unavailable or permission was denied
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Collector was used in the wrong lifecycle state
    #[error("Invalid lifecycle state: {0}")]
    Lifecycle(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Argus operations
pub type Result<T> = std::result::Result<T, ArgusError>;

/// Convert anyhow::Error to ArgusError
impl From<anyhow::Error> for ArgusError {
    fn from(err: anyhow::Error) -> Self {
        ArgusError::Other(err.to_string())
    }
}

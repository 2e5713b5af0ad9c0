//! Error types for the log record model.

use thiserror::Error;

/// Errors that can occur while building filters or encoding batches.
#[derive(Debug, Error)]
pub enum LogError {
    /// A required configuration value was empty.
    #[error("missing required value: {0}")]
    MissingValue(&'static str),

    /// A value would break the upstream filter expression.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Which value was rejected.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for log model operations.
pub type Result<T> = std::result::Result<T, LogError>;

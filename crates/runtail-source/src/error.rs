//! Error types for tail sources.

use thiserror::Error;

/// Errors that end a tail stream or prevent one from opening.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Credentials could not be loaded.
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Exchanging credentials for an access token failed.
    #[error("token exchange failed: {0}")]
    Auth(String),

    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The upstream API answered with a non-success status.
    #[error("upstream returned {status}: {message}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// The upstream response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The stream ended without reporting an error.
    #[error("tail stream ended")]
    StreamEnded,

    /// No stream can be opened right now.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type alias for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

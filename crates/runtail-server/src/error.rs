//! Error types for the runtail server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use runtail_logs::LogError;
use runtail_source::SourceError;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the runtail server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(std::net::SocketAddr, std::io::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Subscriber limit reached.
    #[error("too many subscribers: {0} active, limit is {1}")]
    TooManySubscribers(usize, usize),

    /// The upstream tail could not be opened.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Record handling failed.
    #[error(transparent)]
    Log(#[from] LogError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Self::TooManySubscribers(_, _) => {
                (StatusCode::SERVICE_UNAVAILABLE, "too_many_subscribers")
            }
            Self::Source(_) => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            Self::BindFailed(_, _) | Self::Config(_) | Self::Log(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"error":"internal_error","message":"failed to serialize error"}"#.to_string()
        });

        (status, [("content-type", "application/json")], json).into_response()
    }
}

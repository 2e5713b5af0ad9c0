//! Plain HTTP handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: String,
    /// Seconds since start.
    pub uptime_secs: u64,
    /// Connected WebSocket viewers.
    pub subscribers: usize,
    /// State of the shared tail.
    pub upstream: String,
}

/// Handle GET /health.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.uptime_secs(),
        subscribers: state.hub().len(),
        upstream: state.supervisor().state().as_str().to_string(),
    })
}

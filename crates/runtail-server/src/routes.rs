//! Route configuration.

use std::sync::Arc;

use axum::routing::{Router, get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handlers::health_check;
use crate::legacy::stream_logs;
use crate::state::AppState;
use crate::websocket::ws_upgrade;

/// Create the runtail router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(state.config());

    Router::new()
        .route("/health", get(health_check))
        // Persistent viewers of the shared tail
        .route("/ws", get(ws_upgrade))
        // One tail per request
        .route("/logs", get(stream_logs))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

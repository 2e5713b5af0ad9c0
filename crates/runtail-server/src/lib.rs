//! # runtail-server
//!
//! Serves a live tail of Cloud Run logs to any number of viewers.
//!
//! ## Endpoints
//!
//! - `GET /ws` - WebSocket; every frame is a JSON array of log envelopes
//!   from the shared, auto-reconnecting tail
//! - `GET /logs` - Server-sent events from a tail opened for this request
//!   only; ends on the first upstream error
//! - `GET /health` - Liveness, subscriber count and upstream state
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use runtail_server::{RuntailServer, ServerConfig};
//! use runtail_source::ChannelSource;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::new("my-project").with_service_name("api");
//! let server = RuntailServer::new(config, Arc::new(ChannelSource::new()))?;
//! server.serve("0.0.0.0:5001".parse()?).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod legacy;
pub mod routes;
pub mod server;
pub mod state;
pub mod websocket;

pub use config::{Cli, DEFAULT_PORT, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use handlers::HealthResponse;
pub use hub::{BroadcastHub, HubConfig, Outbound, SubscriberId, Subscription};
pub use server::RuntailServer;
pub use state::AppState;

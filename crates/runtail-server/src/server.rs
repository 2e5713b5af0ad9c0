//! Runtail server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use runtail_logs::envelopes_from_batch;
use runtail_source::TailSource;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::routes::create_router;
use crate::state::AppState;

/// Tails one filter and fans it out to WebSocket viewers, with a per-request
/// SSE variant at `/logs`.
#[derive(Debug, Clone)]
pub struct RuntailServer {
    state: Arc<AppState>,
}

impl RuntailServer {
    /// Create a server tailing from `source`.
    pub fn new(config: ServerConfig, source: Arc<dyn TailSource>) -> ServerResult<Self> {
        let state = Arc::new(AppState::new(config, source)?);
        Ok(Self { state })
    }

    /// Get the server state for external access.
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Starts the shared tail, forwarding every batch to the hub.
    ///
    /// The task runs until [`shutdown`](Self::shutdown).
    pub fn start_pipeline(&self) -> JoinHandle<()> {
        let hub = Arc::clone(self.state.hub());
        Arc::clone(self.state.supervisor()).spawn(move |batch| {
            let envelopes = envelopes_from_batch(&batch);
            if let Err(e) = hub.broadcast(&envelopes) {
                warn!(error = %e, entries = batch.len(), "failed to broadcast batch");
            }
        })
    }

    /// Stops the shared tail and closes open viewer connections.
    pub fn shutdown(&self) {
        self.state.supervisor().shutdown();
        self.state.shutdown_token().cancel();
    }

    /// Start the server and listen for connections.
    ///
    /// Runs until the server encounters a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve(&self, addr: SocketAddr) -> ServerResult<()> {
        self.serve_with_shutdown(addr, std::future::pending()).await
    }

    /// Start the server with graceful shutdown support.
    ///
    /// The server will shut down when the provided future completes.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve_with_shutdown<F>(&self, addr: SocketAddr, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr, e))?;

        self.serve_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails while running.
    pub async fn serve_listener<F>(&self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        info!(
            addr = %addr,
            filter = %self.state.filter(),
            "runtail listening"
        );

        let pipeline = self.start_pipeline();
        let router = create_router(self.state.clone());
        let server = self.clone();

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                server.shutdown();
            })
            .await
            .map_err(|e| ServerError::Internal(e.to_string()));

        self.shutdown();
        if let Err(e) = pipeline.await {
            warn!(error = %e, "tail pipeline task failed");
        }

        info!("runtail server shut down");
        result
    }

    /// Create the router without starting the server.
    ///
    /// Useful for testing or embedding in another server.
    pub fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }
}

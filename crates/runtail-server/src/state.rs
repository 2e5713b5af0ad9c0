//! Shared state for the runtail server.

use std::sync::Arc;
use std::time::Instant;

use runtail_logs::FilterSpec;
use runtail_source::{ReconnectSupervisor, SupervisorConfig, TailSource};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::hub::{BroadcastHub, HubConfig};

/// Shared state for the runtail server.
pub struct AppState {
    /// Server configuration.
    config: Arc<ServerConfig>,
    /// Live viewers of the shared tail.
    hub: Arc<BroadcastHub>,
    /// Source every tail is opened from.
    source: Arc<dyn TailSource>,
    /// Keeps the shared tail open.
    supervisor: Arc<ReconnectSupervisor>,
    /// Cancelled when the server shuts down.
    shutdown: CancellationToken,
    /// Server start time.
    start_time: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("hub", &self.hub)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create the state for `config`, tailing from `source`.
    pub fn new(config: ServerConfig, source: Arc<dyn TailSource>) -> ServerResult<Self> {
        config.validate()?;
        let filter = config.filter()?;

        let hub = Arc::new(BroadcastHub::new(HubConfig {
            max_subscribers: config.max_subscribers,
            buffer: config.subscriber_buffer,
            probe_interval: config.ping_interval,
        }));
        let supervisor = Arc::new(ReconnectSupervisor::new(
            Arc::clone(&source),
            filter,
            SupervisorConfig::default().with_reconnect_delay(config.reconnect_delay),
        ));

        Ok(Self {
            config: Arc::new(config),
            hub,
            source,
            supervisor,
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
        })
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the broadcast hub.
    #[must_use]
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Get the tail source.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn TailSource> {
        &self.source
    }

    /// Get the supervisor of the shared tail.
    #[must_use]
    pub fn supervisor(&self) -> &Arc<ReconnectSupervisor> {
        &self.supervisor
    }

    /// The filter every tail is opened with.
    #[must_use]
    pub fn filter(&self) -> &FilterSpec {
        self.supervisor.filter()
    }

    /// Token cancelled at shutdown.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Seconds since the server started.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

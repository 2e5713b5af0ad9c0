//! Server configuration.
//!
//! [`ServerConfig`] is the builder used by the library. [`Cli`] is the
//! command-line surface of the `runtail` binary; every flag can also be set
//! through the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use runtail_logs::FilterSpec;
use runtail_source::DEFAULT_RECONNECT_DELAY;

use crate::error::{ServerError, ServerResult};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 5001;

/// Configuration for the runtail server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    pub bind_addr: SocketAddr,
    /// Project whose logs are tailed.
    pub project_id: String,
    /// Cloud Run service to scope the tail to.
    pub service_name: Option<String>,
    /// Service account key file, metadata server credentials when unset.
    pub key_path: Option<PathBuf>,
    /// Maximum concurrent WebSocket subscribers.
    pub max_subscribers: usize,
    /// Frames buffered per subscriber before new ones are dropped.
    pub subscriber_buffer: usize,
    /// Interval between liveness probes.
    pub ping_interval: Duration,
    /// Silence after which a subscriber is closed. `None` disables the check.
    pub liveness_timeout: Option<Duration>,
    /// Delay before the shared tail is reopened.
    pub reconnect_delay: Duration,
    /// Upstream poll interval.
    pub poll_interval: Duration,
    /// CORS allowed origins (empty means all).
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            project_id: String::new(),
            service_name: None,
            key_path: None,
            max_subscribers: 1000,
            subscriber_buffer: 256,
            ping_interval: Duration::from_secs(30),
            liveness_timeout: Some(Duration::from_secs(90)),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            poll_interval: Duration::from_secs(1),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Create a configuration for the given project.
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    /// Set the bind address.
    #[must_use]
    pub const fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Scope the tail to a Cloud Run service.
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Use a service account key file.
    #[must_use]
    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Set the maximum number of subscribers.
    #[must_use]
    pub const fn with_max_subscribers(mut self, max: usize) -> Self {
        self.max_subscribers = max;
        self
    }

    /// Set the per-subscriber frame buffer.
    #[must_use]
    pub const fn with_subscriber_buffer(mut self, frames: usize) -> Self {
        self.subscriber_buffer = frames;
        self
    }

    /// Set the liveness probe interval.
    #[must_use]
    pub const fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the liveness timeout.
    #[must_use]
    pub const fn with_liveness_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    /// Set the reconnect delay.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the upstream poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Add a CORS allowed origin.
    #[must_use]
    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origins.push(origin.into());
        self
    }

    /// The tail filter derived from this configuration.
    pub fn filter(&self) -> ServerResult<FilterSpec> {
        FilterSpec::from_config(&self.project_id, self.service_name.as_deref())
            .map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Checks the values that cannot be defaulted.
    pub fn validate(&self) -> ServerResult<()> {
        if self.project_id.trim().is_empty() {
            return Err(ServerError::Config("project id is required".to_string()));
        }
        if self.max_subscribers == 0 {
            return Err(ServerError::Config("max subscribers must be at least 1".to_string()));
        }
        if self.subscriber_buffer == 0 {
            return Err(ServerError::Config("subscriber buffer must be at least 1".to_string()));
        }
        if self.ping_interval.is_zero() {
            return Err(ServerError::Config("ping interval must be positive".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(ServerError::Config("poll interval must be positive".to_string()));
        }
        self.filter().map(|_| ())
    }
}

/// Command-line arguments of the `runtail` binary.
#[derive(Debug, Parser)]
#[command(name = "runtail")]
#[command(about = "Tails Cloud Run logs and fans them out to live viewers")]
#[command(version)]
pub struct Cli {
    /// Google Cloud project id
    #[arg(long, env = "GCP_PROJECT_ID")]
    pub project_id: String,

    /// Cloud Run service name; request logs of the whole project when unset
    #[arg(long, env = "GCP_CLOUD_RUN_SERVICE_NAME")]
    pub service_name: Option<String>,

    /// Service account key file; metadata server credentials when unset
    #[arg(long, env = "GCP_KEY_PATH")]
    pub key_path: Option<PathBuf>,

    /// Listen port
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Allowed CORS origins, comma separated; any origin when unset
    #[arg(long = "cors-origin", env = "RUNTAIL_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Maximum concurrent WebSocket subscribers
    #[arg(long, env = "RUNTAIL_MAX_SUBSCRIBERS", default_value_t = 1000)]
    pub max_subscribers: usize,

    /// Liveness probe interval in milliseconds
    #[arg(long, env = "RUNTAIL_PING_INTERVAL_MS", default_value_t = 30_000)]
    pub ping_interval_ms: u64,

    /// Close subscribers silent for this long, in milliseconds; 0 disables
    #[arg(long, env = "RUNTAIL_LIVENESS_TIMEOUT_MS", default_value_t = 90_000)]
    pub liveness_timeout_ms: u64,

    /// Delay before the shared tail is reopened, in milliseconds
    #[arg(long, env = "RUNTAIL_RECONNECT_DELAY_MS", default_value_t = 5_000)]
    pub reconnect_delay_ms: u64,

    /// Upstream poll interval in milliseconds
    #[arg(long, env = "RUNTAIL_POLL_INTERVAL_MS", default_value_t = 1_000)]
    pub poll_interval_ms: u64,

    /// Emit logs as JSON
    #[arg(long, env = "RUNTAIL_LOG_JSON")]
    pub log_json: bool,
}

impl Cli {
    /// Builds and validates the server configuration.
    pub fn into_config(self) -> ServerResult<ServerConfig> {
        let liveness_timeout =
            (self.liveness_timeout_ms > 0).then(|| Duration::from_millis(self.liveness_timeout_ms));

        let mut config = ServerConfig::new(self.project_id)
            .with_bind_addr(SocketAddr::new(self.host, self.port))
            .with_max_subscribers(self.max_subscribers)
            .with_ping_interval(Duration::from_millis(self.ping_interval_ms))
            .with_liveness_timeout(liveness_timeout)
            .with_reconnect_delay(Duration::from_millis(self.reconnect_delay_ms))
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms));

        config.service_name = self.service_name.filter(|name| !name.trim().is_empty());
        config.key_path = self.key_path;
        config.cors_origins = self.cors_origins;

        config.validate()?;
        Ok(config)
    }
}

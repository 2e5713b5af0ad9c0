//! Reconnect supervisor for the shared tail.
//!
//! ```text
//!   Connecting ──open ok──▶ Streaming
//!       │                      │
//!   open failed          stream error / end
//!       ▼                      ▼
//!       └────────────────▶  Backoff ──fixed delay──▶ Connecting
//! ```
//!
//! The delay is constant and retries are unbounded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use runtail_logs::{FilterSpec, RawEntry};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::source::TailSource;

/// Delay between a failure and the next open.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Fixed delay before reopening after a failure.
    pub reconnect_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl SupervisorConfig {
    /// Set the reconnect delay.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Where the supervisor is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Opening a new tail.
    Connecting,
    /// Tail open, forwarding batches.
    Streaming,
    /// Waiting out the reconnect delay.
    Backoff,
    /// Shut down.
    Stopped,
}

impl SupervisorState {
    /// Lowercase name, as reported by the health endpoint.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Backoff => "backoff",
            Self::Stopped => "stopped",
        }
    }
}

/// Atomic wrapper for supervisor state.
#[derive(Debug)]
pub struct AtomicSupervisorState(AtomicU32);

impl AtomicSupervisorState {
    /// Create a new atomic state.
    #[must_use]
    pub const fn new(state: SupervisorState) -> Self {
        Self(AtomicU32::new(state as u32))
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> SupervisorState {
        match self.0.load(Ordering::SeqCst) {
            0 => SupervisorState::Connecting,
            1 => SupervisorState::Streaming,
            2 => SupervisorState::Backoff,
            _ => SupervisorState::Stopped,
        }
    }

    /// Store a new state.
    pub fn store(&self, state: SupervisorState) {
        self.0.store(state as u32, Ordering::SeqCst);
    }
}

/// Keeps one tail open for the lifetime of the process.
pub struct ReconnectSupervisor {
    source: Arc<dyn TailSource>,
    filter: FilterSpec,
    config: SupervisorConfig,
    state: AtomicSupervisorState,
    opens: AtomicU64,
    failures: AtomicU64,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ReconnectSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectSupervisor")
            .field("filter", &self.filter)
            .field("config", &self.config)
            .field("state", &self.state.load())
            .field("opens", &self.open_count())
            .field("failures", &self.failure_count())
            .finish_non_exhaustive()
    }
}

impl ReconnectSupervisor {
    /// Creates a supervisor. Nothing is opened until [`run`](Self::run).
    #[must_use]
    pub fn new(source: Arc<dyn TailSource>, filter: FilterSpec, config: SupervisorConfig) -> Self {
        Self {
            source,
            filter,
            config,
            state: AtomicSupervisorState::new(SupervisorState::Connecting),
            opens: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.state.load()
    }

    /// Number of tails opened so far.
    #[must_use]
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Number of failed opens and failed streams so far.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// The filter every tail is opened with.
    #[must_use]
    pub const fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    /// Stops the supervisor, including any pending backoff.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Runs until [`shutdown`](Self::shutdown), handing every batch to
    /// `on_batch` in upstream order.
    pub async fn run<F>(&self, mut on_batch: F)
    where
        F: FnMut(Vec<RawEntry>) + Send,
    {
        loop {
            self.state.store(SupervisorState::Connecting);
            debug!(filter = %self.filter, "opening tail");

            let opened = tokio::select! {
                () = self.shutdown.cancelled() => break,
                opened = self.source.open(&self.filter) => opened,
            };

            let failure = match opened {
                Ok(mut stream) => {
                    let opens = self.opens.fetch_add(1, Ordering::Relaxed) + 1;
                    self.state.store(SupervisorState::Streaming);
                    info!(opens, "tail streaming");

                    let failure = loop {
                        let next = tokio::select! {
                            () = self.shutdown.cancelled() => None,
                            next = stream.next() => Some(next),
                        };
                        match next {
                            None => break None,
                            Some(Some(Ok(batch))) => on_batch(batch),
                            Some(Some(Err(e))) => break Some(e),
                            Some(None) => break Some(SourceError::StreamEnded),
                        }
                    };
                    let Some(failure) = failure else { break };
                    failure
                }
                Err(e) => e,
            };

            self.failures.fetch_add(1, Ordering::Relaxed);
            self.state.store(SupervisorState::Backoff);
            warn!(
                error = %failure,
                delay_ms = u64::try_from(self.config.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
                "tail failed, reconnecting after delay"
            );

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = sleep(self.config.reconnect_delay) => {}
            }
        }

        self.state.store(SupervisorState::Stopped);
        info!("tail supervisor stopped");
    }

    /// Spawns [`run`](Self::run) on the runtime.
    pub fn spawn<F>(self: Arc<Self>, on_batch: F) -> JoinHandle<()>
    where
        F: FnMut(Vec<RawEntry>) + Send + 'static,
    {
        tokio::spawn(async move { self.run(on_batch).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelSource;
    use tokio::sync::mpsc;

    fn filter() -> FilterSpec {
        FilterSpec::service("api").unwrap()
    }

    /// Lets spawned tasks run without moving the paused clock.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn collecting() -> (impl FnMut(Vec<RawEntry>) + Send + 'static, mpsc::UnboundedReceiver<Vec<RawEntry>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            move |batch| {
                let _ = tx.send(batch);
            },
            rx,
        )
    }

    #[test]
    fn test_supervisor_state_enum() {
        assert_eq!(SupervisorState::Connecting as u32, 0);
        assert_eq!(SupervisorState::Streaming as u32, 1);
        assert_eq!(SupervisorState::Backoff as u32, 2);
        assert_eq!(SupervisorState::Stopped as u32, 3);
    }

    #[test]
    fn test_atomic_supervisor_state() {
        let state = AtomicSupervisorState::new(SupervisorState::Connecting);
        assert_eq!(state.load(), SupervisorState::Connecting);

        state.store(SupervisorState::Backoff);
        assert_eq!(state.load(), SupervisorState::Backoff);
        assert_eq!(state.load().as_str(), "backoff");
    }

    #[test]
    fn test_default_delay_is_five_seconds() {
        assert_eq!(SupervisorConfig::default().reconnect_delay, Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwards_batches_in_order() {
        let source = Arc::new(ChannelSource::new());
        let feed = source.queue_session();
        let supervisor = Arc::new(ReconnectSupervisor::new(
            source.clone(),
            filter(),
            SupervisorConfig::default(),
        ));
        let (on_batch, mut rx) = collecting();
        let handle = supervisor.clone().spawn(on_batch);

        feed.send(Ok(vec![RawEntry::with_text("1")])).await.unwrap();
        feed.send(Ok(vec![RawEntry::with_text("2"), RawEntry::with_text("3")])).await.unwrap();

        assert_eq!(rx.recv().await.unwrap()[0].text(), Some("1"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(supervisor.state(), SupervisorState::Streaming);
        assert_eq!(supervisor.open_count(), 1);

        supervisor.shutdown();
        handle.await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_fixed_delay() {
        let source = Arc::new(ChannelSource::new());
        let first = source.queue_session();
        let second = source.queue_session();
        let supervisor = Arc::new(ReconnectSupervisor::new(
            source.clone(),
            filter(),
            SupervisorConfig::default(),
        ));
        let (on_batch, mut rx) = collecting();
        let handle = supervisor.clone().spawn(on_batch);

        first.send(Ok(vec![RawEntry::with_text("before")])).await.unwrap();
        assert_eq!(rx.recv().await.unwrap()[0].text(), Some("before"));

        first
            .send(Err(SourceError::Unavailable("upstream reset".to_string())))
            .await
            .unwrap();
        settle().await;
        assert_eq!(supervisor.state(), SupervisorState::Backoff);
        assert_eq!(source.open_count(), 1);

        tokio::time::advance(Duration::from_millis(4999)).await;
        settle().await;
        assert_eq!(source.open_count(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(source.open_count(), 2);
        assert_eq!(supervisor.state(), SupervisorState::Streaming);
        assert_eq!(source.opened_filters(), vec![filter(), filter()]);

        second.send(Ok(vec![RawEntry::with_text("after")])).await.unwrap();
        assert_eq!(rx.recv().await.unwrap()[0].text(), Some("after"));
        assert!(rx.try_recv().is_err(), "nothing delivered twice");

        supervisor.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_counts_as_failure() {
        let source = Arc::new(ChannelSource::new());
        let feed = source.queue_session();
        let supervisor = Arc::new(ReconnectSupervisor::new(
            source.clone(),
            filter(),
            SupervisorConfig::default(),
        ));
        let (on_batch, _rx) = collecting();
        let handle = supervisor.clone().spawn(on_batch);

        settle().await;
        drop(feed);
        settle().await;

        assert_eq!(supervisor.state(), SupervisorState::Backoff);
        assert_eq!(supervisor.failure_count(), 1);

        supervisor.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_retries_without_limit() {
        let source = Arc::new(ChannelSource::new());
        let supervisor = Arc::new(ReconnectSupervisor::new(
            source.clone(),
            filter(),
            SupervisorConfig::default().with_reconnect_delay(Duration::from_secs(1)),
        ));
        let (on_batch, _rx) = collecting();
        let handle = supervisor.clone().spawn(on_batch);

        for _ in 0..20 {
            settle().await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        settle().await;
        assert!(supervisor.failure_count() >= 20);
        assert_eq!(supervisor.open_count(), 0);

        let feed = source.queue_session();
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(supervisor.open_count(), 1);
        assert!(!feed.is_closed());

        supervisor.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff() {
        let source = Arc::new(ChannelSource::new());
        let supervisor = Arc::new(ReconnectSupervisor::new(
            source,
            filter(),
            SupervisorConfig::default(),
        ));
        let (on_batch, _rx) = collecting();
        let handle = supervisor.clone().spawn(on_batch);

        settle().await;
        assert_eq!(supervisor.state(), SupervisorState::Backoff);

        supervisor.shutdown();
        handle.await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }
}

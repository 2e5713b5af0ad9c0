//! Subscriber registry and batch fan-out.
//!
//! Every live viewer owns a [`Subscription`]: a bounded queue of
//! [`Outbound`] items plus a liveness probe timer. [`BroadcastHub::broadcast`]
//! serializes a batch once and offers the same frame to every open
//! subscription without waiting on any of them. A subscriber whose queue is
//! full misses that frame; nobody else is affected.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use parking_lot::Mutex;
use runtail_logs::{LogEnvelope, encode_batch};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info};

use crate::error::{ServerError, ServerResult};

/// Identifies one subscriber for the lifetime of the process.
pub type SubscriberId = u64;

/// Something queued for a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized batch, identical for every subscriber.
    Frame(Utf8Bytes),
    /// The liveness timer fired.
    Probe,
}

/// Fan-out limits.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum concurrent subscribers.
    pub max_subscribers: usize,
    /// Items queued per subscriber before frames are dropped.
    pub buffer: usize,
    /// Interval between liveness probes.
    pub probe_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_subscribers: 1000,
            buffer: 256,
            probe_interval: Duration::from_secs(30),
        }
    }
}

struct Subscriber {
    tx: mpsc::Sender<Outbound>,
    probe: JoinHandle<()>,
}

/// The live set of subscribers.
pub struct BroadcastHub {
    config: HubConfig,
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("config", &self.config)
            .field("subscribers", &self.len())
            .field("frames_sent", &self.frames_sent())
            .field("frames_dropped", &self.frames_dropped())
            .finish()
    }
}

impl BroadcastHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Adds a subscriber and starts its liveness probe timer.
    ///
    /// Must be called from within a Tokio runtime. The subscriber is removed
    /// when the returned [`Subscription`] is dropped.
    pub fn register(self: &Arc<Self>) -> ServerResult<Subscription> {
        let (tx, rx) = mpsc::channel(self.config.buffer);

        let id = {
            let mut subscribers = self.subscribers.lock();
            if subscribers.len() >= self.config.max_subscribers {
                return Err(ServerError::TooManySubscribers(
                    subscribers.len(),
                    self.config.max_subscribers,
                ));
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let probe = tokio::spawn(run_probe(tx.clone(), self.config.probe_interval));
            subscribers.insert(id, Subscriber { tx, probe });
            id
        };

        info!(subscriber = id, total = self.len(), "subscriber registered");
        Ok(Subscription {
            id,
            rx,
            hub: Arc::clone(self),
        })
    }

    /// Removes a subscriber and stops its probe timer.
    ///
    /// Returns `false` if it was already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.lock().remove(&id);
        match removed {
            Some(subscriber) => {
                subscriber.probe.abort();
                info!(subscriber = id, total = self.len(), "subscriber unregistered");
                true
            }
            None => false,
        }
    }

    /// Serializes `envelopes` once and offers the frame to every open
    /// subscriber.
    ///
    /// Returns the number of subscribers the frame was queued for. An empty
    /// batch sends nothing.
    pub fn broadcast(&self, envelopes: &[LogEnvelope]) -> ServerResult<usize> {
        if envelopes.is_empty() {
            return Ok(0);
        }
        let frame = Utf8Bytes::from(encode_batch(envelopes)?);
        Ok(self.broadcast_frame(&frame))
    }

    /// Offers an already serialized frame to every open subscriber.
    pub fn broadcast_frame(&self, frame: &Utf8Bytes) -> usize {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<Outbound>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, subscriber)| (*id, subscriber.tx.clone()))
            .collect();

        let mut queued = 0;
        for (id, tx) in snapshot {
            match tx.try_send(Outbound::Frame(frame.clone())) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {
                    self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(subscriber = id, "subscriber queue full, frame dropped");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }

        self.frames_sent.fetch_add(queued as u64, Ordering::Relaxed);
        queued
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Returns true when nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    /// Whether `id` is currently registered.
    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().contains_key(&id)
    }

    /// Frames queued for subscribers so far.
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Frames dropped because a subscriber queue was full.
    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

impl Drop for BroadcastHub {
    fn drop(&mut self) {
        for (_, subscriber) in self.subscribers.get_mut().drain() {
            subscriber.probe.abort();
        }
    }
}

/// Queues a probe every `period` until the subscriber goes away.
async fn run_probe(tx: mpsc::Sender<Outbound>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        match tx.try_send(Outbound::Probe) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(_)) => break,
        }
    }
}

/// A registered subscriber's receiving end.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Outbound>,
    hub: Arc<BroadcastHub>,
}

impl Subscription {
    /// Subscriber id.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next queued item.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Takes a queued item without waiting.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

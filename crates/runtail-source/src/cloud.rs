//! Cloud Logging tail source.
//!
//! Each opened tail runs a producer task that polls `entries:list` in
//! timestamp order and pushes new entries over a bounded channel. The
//! producer keeps a watermark plus the ids it has already delivered inside a
//! short lookback window, so entries that are ingested late are still picked
//! up and nothing is delivered twice.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use runtail_logs::{FilterSpec, RawEntry, resource_name};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::auth::TokenProvider;
use crate::error::{SourceError, SourceResult};
use crate::source::{BatchStream, TailSource};

/// Shortest poll interval; zero is raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How far ahead of the local clock an entry timestamp may move the watermark.
const MAX_CLOCK_SKEW: Duration = Duration::from_secs(5);

/// Default `entries:list` endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://logging.googleapis.com/v2/entries:list";

/// Configuration for [`CloudLoggingSource`].
#[derive(Debug, Clone)]
pub struct CloudLoggingConfig {
    /// Project the tail is scoped to.
    pub project_id: String,
    /// `entries:list` URL.
    pub endpoint: String,
    /// Delay between polls.
    pub poll_interval: Duration,
    /// How far behind the watermark each poll looks for late entries.
    pub lookback: Duration,
    /// Entries requested per page.
    pub page_size: u32,
    /// Pages followed within a single poll.
    pub max_pages: u32,
    /// Batches buffered between the producer and the consumer.
    pub channel_capacity: usize,
    /// Timeout for each HTTP request.
    pub request_timeout: Duration,
}

impl CloudLoggingConfig {
    /// Creates a configuration for the given project.
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            poll_interval: Duration::from_secs(1),
            lookback: Duration::from_secs(5),
            page_size: 1000,
            max_pages: 10,
            channel_capacity: 64,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Set the `entries:list` URL.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the poll interval. Zero is raised to [`MIN_POLL_INTERVAL`].
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = if interval.is_zero() {
            MIN_POLL_INTERVAL
        } else {
            interval
        };
        self
    }

    /// Set the lookback window.
    #[must_use]
    pub const fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Set the page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListEntriesRequest<'a> {
    resource_names: [&'a str; 1],
    filter: &'a str,
    order_by: &'static str,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListEntriesResponse {
    #[serde(default)]
    entries: Vec<RawEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Tail source backed by the Cloud Logging v2 REST API.
#[derive(Debug, Clone)]
pub struct CloudLoggingSource {
    config: Arc<CloudLoggingConfig>,
    http: reqwest::Client,
    tokens: Arc<TokenProvider>,
}

impl CloudLoggingSource {
    /// Creates a source using the given HTTP client and token provider.
    #[must_use]
    pub fn new(config: CloudLoggingConfig, http: reqwest::Client, tokens: Arc<TokenProvider>) -> Self {
        Self {
            config: Arc::new(config),
            http,
            tokens,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CloudLoggingConfig {
        &self.config
    }
}

impl TailSource for CloudLoggingSource {
    fn open<'a>(
        &'a self,
        filter: &'a FilterSpec,
    ) -> Pin<Box<dyn Future<Output = SourceResult<BatchStream>> + Send + 'a>> {
        Box::pin(async move {
            // Fail the open, not the stream, when credentials are unusable.
            self.tokens.token().await?;

            let (tx, rx) = mpsc::channel(self.config.channel_capacity);
            let producer = Producer {
                config: self.config.clone(),
                http: self.http.clone(),
                tokens: self.tokens.clone(),
                filter: filter.clone(),
                resource: resource_name(&self.config.project_id),
                cursor: TailCursor::new(Utc::now(), self.config.lookback),
            };

            info!(filter = %filter, project = %self.config.project_id, "opened cloud logging tail");
            tokio::spawn(producer.run(tx));

            let stream: BatchStream = Box::pin(ReceiverStream::new(rx));
            Ok(stream)
        })
    }
}

struct Producer {
    config: Arc<CloudLoggingConfig>,
    http: reqwest::Client,
    tokens: Arc<TokenProvider>,
    filter: FilterSpec,
    resource: String,
    cursor: TailCursor,
}

impl Producer {
    async fn run(mut self, tx: mpsc::Sender<SourceResult<Vec<RawEntry>>>) {
        let mut ticker = interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = tx.closed() => break,
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                () = tx.closed() => break,
                polled = self.poll() => polled,
            };

            match polled {
                Ok(batch) if batch.is_empty() => {}
                Ok(batch) => {
                    debug!(entries = batch.len(), "polled new entries");
                    if tx.send(Ok(batch)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "cloud logging poll failed, ending tail");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }

        debug!("tail consumer dropped, stopping producer");
    }

    async fn poll(&mut self) -> SourceResult<Vec<RawEntry>> {
        let filter = self.cursor.filter_expression(&self.filter);
        let mut fresh = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..self.config.max_pages {
            let page = self.fetch_page(&filter, page_token.as_deref()).await?;
            fresh.extend(self.cursor.admit(page.entries));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        self.cursor.prune();
        Ok(fresh)
    }

    async fn fetch_page(&self, filter: &str, page_token: Option<&str>) -> SourceResult<ListEntriesResponse> {
        let token = self.tokens.token().await?;
        let request = ListEntriesRequest {
            resource_names: [self.resource.as_str()],
            filter,
            order_by: "timestamp asc",
            page_size: self.config.page_size,
            page_token,
        };

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(token)
            .timeout(self.config.request_timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.tokens.invalidate().await;
            }
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Delivery position of one tail.
#[derive(Debug)]
struct TailCursor {
    /// Entries older than this predate the tail and are never delivered.
    opened_at: DateTime<Utc>,
    /// Newest timestamp delivered so far.
    watermark: DateTime<Utc>,
    lookback: chrono::Duration,
    /// Delivered entry keys still inside the lookback window.
    seen: HashMap<String, DateTime<Utc>>,
}

impl TailCursor {
    fn new(opened_at: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            opened_at,
            watermark: opened_at,
            lookback: chrono::Duration::from_std(lookback).unwrap_or_else(|_| chrono::Duration::seconds(5)),
            seen: HashMap::new(),
        }
    }

    fn lower_bound(&self) -> DateTime<Utc> {
        (self.watermark - self.lookback).max(self.opened_at)
    }

    fn filter_expression(&self, filter: &FilterSpec) -> String {
        format!(
            r#"({filter}) AND timestamp >= "{}""#,
            self.lower_bound().to_rfc3339_opts(SecondsFormat::Nanos, true)
        )
    }

    /// Keeps the entries not delivered before, in the order given.
    fn admit(&mut self, entries: Vec<RawEntry>) -> Vec<RawEntry> {
        self.admit_at(entries, Utc::now())
    }

    /// Like [`admit`](Self::admit), with the watermark capped relative to `now`.
    fn admit_at(&mut self, entries: Vec<RawEntry>, now: DateTime<Utc>) -> Vec<RawEntry> {
        let ceiling = now + chrono::Duration::from_std(MAX_CLOCK_SKEW).unwrap_or_default();
        let mut kept = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.timestamp.is_some_and(|ts| ts < self.opened_at) {
                continue;
            }

            if let Some(key) = dedup_key(&entry) {
                if self.seen.contains_key(&key) {
                    continue;
                }
                self.seen.insert(key, entry.timestamp.unwrap_or(self.watermark));
            }

            // A future-dated entry must not push the query bound past live traffic.
            if let Some(ts) = entry.timestamp {
                self.watermark = self.watermark.max(ts.min(ceiling));
            }
            kept.push(entry);
        }

        kept
    }

    fn prune(&mut self) {
        let floor = self.lower_bound();
        self.seen.retain(|_, ts| *ts >= floor);
    }
}

/// Identity of an entry across overlapping polls.
///
/// Without an `insertId` the key is timestamp plus text; entries with neither
/// an id nor a timestamp are never deduplicated.
fn dedup_key(entry: &RawEntry) -> Option<String> {
    if let Some(id) = &entry.insert_id {
        return Some(format!("id:{id}"));
    }
    let ts = entry.timestamp?;
    Some(format!(
        "ts:{}|{}",
        ts.to_rfc3339_opts(SecondsFormat::Nanos, true),
        entry.text_payload.as_deref().unwrap_or_default()
    ))
}

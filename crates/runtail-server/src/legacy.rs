//! Per-request SSE stream at `/logs`.
//!
//! Each request opens its own tail with the shared filter and writes batches
//! straight to that one client as `data: <json array>`. There is no
//! reconnect: the first upstream error ends the response, and a client that
//! disconnects takes its tail down with it.

use std::convert::Infallible;
use std::future;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use runtail_logs::{encode_batch, envelopes_from_batch};
use runtail_source::BatchStream;
use tracing::{info, warn};

use crate::error::ServerResult;
use crate::state::AppState;

/// Handle GET /logs.
pub async fn stream_logs(State(state): State<Arc<AppState>>) -> ServerResult<Response> {
    let batches = state.source().open(state.filter()).await?;
    info!(filter = %state.filter(), "legacy stream opened");

    let events = batch_events(batches).take_until(state.shutdown_token().clone().cancelled_owned());

    Ok((
        [(header::CONNECTION, "keep-alive")],
        Sse::new(events).keep_alive(KeepAlive::new().interval(state.config().ping_interval)),
    )
        .into_response())
}

/// One SSE event per non-empty batch, ending at the first error.
fn batch_events(batches: BatchStream) -> impl Stream<Item = Result<Event, Infallible>> {
    batches
        .take_while(|batch| {
            if let Err(e) = batch {
                warn!(error = %e, "legacy stream ended by upstream error");
            }
            future::ready(batch.is_ok())
        })
        .filter_map(|batch| {
            let frame = batch.ok().and_then(|entries| {
                let envelopes = envelopes_from_batch(&entries);
                if envelopes.is_empty() {
                    return None;
                }
                encode_batch(&envelopes)
                    .inspect_err(|e| warn!(error = %e, "failed to encode batch"))
                    .ok()
            });
            future::ready(frame.map(|data| Ok(Event::default().data(data))))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtail_logs::{FilterSpec, RawEntry};
    use runtail_source::{ChannelSource, SourceError, TailSource};

    async fn open(source: &ChannelSource) -> BatchStream {
        source.open(&FilterSpec::service("api").unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_empty_batches_produce_no_events() {
        let source = ChannelSource::new();
        let feed = source.queue_session();
        let mut events = Box::pin(batch_events(open(&source).await));

        feed.send(Ok(vec![])).await.unwrap();
        feed.send(Ok(vec![RawEntry::default()])).await.unwrap();
        feed.send(Ok(vec![RawEntry::with_text("hello")])).await.unwrap();
        drop(feed);

        assert!(events.next().await.is_some());
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let source = ChannelSource::new();
        let feed = source.queue_session();
        let mut events = Box::pin(batch_events(open(&source).await));

        feed.send(Ok(vec![RawEntry::with_text("before")])).await.unwrap();
        feed.send(Err(SourceError::StreamEnded)).await.unwrap();
        feed.send(Ok(vec![RawEntry::with_text("after")])).await.unwrap();

        assert!(events.next().await.is_some());
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_events_closes_source() {
        let source = ChannelSource::new();
        let feed = source.queue_session();
        let events = batch_events(open(&source).await);

        drop(events);
        assert!(feed.is_closed());
    }
}

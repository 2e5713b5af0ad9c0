//! In-process tail source fed through channels.
//!
//! Each call to [`TailSource::open`] consumes one queued session. Whatever is
//! sent on that session's [`SessionFeed`] comes out of the opened stream, up
//! to and including the first `Err`; dropping the feed ends the stream. Useful for embedding runtail behind
//! another producer and for exercising the pipeline without a network.

use std::collections::VecDeque;
use std::future::{self, Future};
use std::pin::Pin;

use futures::StreamExt;
use parking_lot::Mutex;
use runtail_logs::{FilterSpec, RawEntry};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{SourceError, SourceResult};
use crate::source::{BatchStream, TailSource};

/// Default buffer for each session.
const SESSION_CAPACITY: usize = 64;

/// Sending half of one queued session.
pub type SessionFeed = mpsc::Sender<SourceResult<Vec<RawEntry>>>;

/// A tail source whose streams are fed by the caller.
#[derive(Debug, Default)]
pub struct ChannelSource {
    sessions: Mutex<VecDeque<mpsc::Receiver<SourceResult<Vec<RawEntry>>>>>,
    opened: Mutex<Vec<FilterSpec>>,
}

impl ChannelSource {
    /// Creates a source with no queued sessions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a session for the next `open` and returns its feed.
    pub fn queue_session(&self) -> SessionFeed {
        let (tx, rx) = mpsc::channel(SESSION_CAPACITY);
        self.sessions.lock().push_back(rx);
        tx
    }

    /// Number of sessions queued but not yet opened.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Filters of every successful `open`, oldest first.
    #[must_use]
    pub fn opened_filters(&self) -> Vec<FilterSpec> {
        self.opened.lock().clone()
    }

    /// Number of successful `open` calls.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }
}

impl TailSource for ChannelSource {
    fn open<'a>(
        &'a self,
        filter: &'a FilterSpec,
    ) -> Pin<Box<dyn Future<Output = SourceResult<BatchStream>> + Send + 'a>> {
        Box::pin(async move {
            let rx = self
                .sessions
                .lock()
                .pop_front()
                .ok_or_else(|| SourceError::Unavailable("no session queued".to_string()))?;

            self.opened.lock().push(filter.clone());

            let stream: BatchStream = Box::pin(ReceiverStream::new(rx).scan(false, |failed, batch| {
                if *failed {
                    return future::ready(None);
                }
                *failed = batch.is_err();
                future::ready(Some(batch))
            }));
            Ok(stream)
        })
    }
}

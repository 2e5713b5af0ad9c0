//! The tail source abstraction.

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use runtail_logs::{FilterSpec, RawEntry};

use crate::error::SourceResult;

/// A stream of upstream batches.
///
/// Yields `Ok` batches in upstream order. On failure it yields one `Err` and
/// then ends; it is never resumed. Dropping the stream stops the producer
/// behind it.
pub type BatchStream = Pin<Box<dyn Stream<Item = SourceResult<Vec<RawEntry>>> + Send>>;

/// Something that can open a continuous, filtered tail.
pub trait TailSource: Send + Sync {
    /// Opens a new tail for `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tail cannot be established at all.
    fn open<'a>(
        &'a self,
        filter: &'a FilterSpec,
    ) -> Pin<Box<dyn Future<Output = SourceResult<BatchStream>> + Send + 'a>>;
}

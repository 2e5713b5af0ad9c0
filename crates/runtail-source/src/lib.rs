//! # runtail-source
//!
//! Upstream side of the runtail pipeline.
//!
//! - [`TailSource`] — Opens a continuous, filtered tail as a stream of batches
//! - [`CloudLoggingSource`] — Tail against the Cloud Logging v2 API
//! - [`TokenProvider`] — OAuth2 access tokens for the Cloud Logging API
//! - [`ChannelSource`] — In-process source fed through channels
//! - [`ReconnectSupervisor`] — Keeps a tail open forever, with a fixed backoff
//!
//! A source never retries by itself: a stream yields its error once and
//! ends. Staying connected is the supervisor's job.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod channel;
pub mod cloud;
pub mod error;
pub mod source;
pub mod supervisor;

// Re-export main types
pub use auth::{Credentials, ServiceAccountKey, TokenProvider};
pub use channel::{ChannelSource, SessionFeed};
pub use cloud::{CloudLoggingConfig, CloudLoggingSource};
pub use error::{SourceError, SourceResult};
pub use source::{BatchStream, TailSource};
pub use supervisor::{
    AtomicSupervisorState, DEFAULT_RECONNECT_DELAY, ReconnectSupervisor, SupervisorConfig,
    SupervisorState,
};

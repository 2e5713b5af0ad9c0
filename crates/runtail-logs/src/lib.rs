//! # runtail-logs
//!
//! Log record model for the runtail tail-and-broadcast pipeline.
//!
//! This crate provides:
//!
//! - [`RawEntry`] — Upstream log entry as delivered by Cloud Logging
//! - [`ParsedRecord`] — Structured or unstructured view of a text payload
//! - [`LogEnvelope`] — The record plus timestamp and severity sent to viewers
//! - [`FilterSpec`] — The immutable upstream query predicate
//! - [`parse_record`] — Total parser from text payload to [`ParsedRecord`]
//!
//! ## Example
//!
//! ```rust
//! use runtail_logs::{parse_record, ParsedRecord};
//!
//! let record = parse_record(
//!     "2024-01-01 10:00:00,000 - [INFO] - myapp.worker - (worker.py:42) - Processed batch",
//! );
//! assert!(matches!(record, ParsedRecord::Structured { line: 42, .. }));
//!
//! let record = parse_record("Traceback (most recent call last): ...");
//! assert!(matches!(record, ParsedRecord::Unstructured { .. }));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod filter;
pub mod parser;
pub mod types;

// Re-export main types
pub use error::{LogError, Result};
pub use filter::{FilterSpec, resource_name};
pub use parser::parse_record;
pub use types::{
    DEFAULT_SEVERITY, LogEnvelope, ParsedRecord, RawEntry, encode_batch, envelopes_from_batch,
};

//! Core types for the tail-and-broadcast pipeline.
//!
//! This module provides:
//! - [`RawEntry`] — Upstream entry, as much of it as the pipeline reads
//! - [`ParsedRecord`] — Tagged view of a text payload
//! - [`LogEnvelope`] — What viewers receive, one per kept entry

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::parser::parse_record;

/// Severity reported when the upstream entry carries none.
pub const DEFAULT_SEVERITY: &str = "DEFAULT";

/// A log entry as delivered by the upstream source.
///
/// Only the fields the pipeline reads are modelled; everything else in the
/// upstream payload is ignored during deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntry {
    /// Plain-text payload, when the entry has one.
    #[serde(default)]
    pub text_payload: Option<String>,
    /// When the entry was written.
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Upstream severity name (`INFO`, `ERROR`, ...).
    #[serde(default)]
    pub severity: Option<String>,
    /// Upstream unique id within the log.
    #[serde(default)]
    pub insert_id: Option<String>,
}

impl RawEntry {
    /// Creates an entry carrying only a text payload.
    #[must_use]
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text_payload: Some(text.into()),
            ..Self::default()
        }
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the severity.
    #[must_use]
    pub fn severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    /// Sets the insert id.
    #[must_use]
    pub fn insert_id(mut self, insert_id: impl Into<String>) -> Self {
        self.insert_id = Some(insert_id.into());
        self
    }

    /// Returns the text payload if it is present and non-empty.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text_payload.as_deref().filter(|t| !t.is_empty())
    }
}

/// Accepts both timestamp encodings Cloud Logging uses: an RFC 3339 string
/// (REST) and `{seconds, nanos}` (protobuf JSON, where `seconds` may itself be
/// a string). Anything unreadable is treated as absent.
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(timestamp_from_value))
}

fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Object(map) => {
            let seconds = match map.get("seconds")? {
                Value::Number(n) => n.as_i64()?,
                Value::String(s) => s.parse().ok()?,
                _ => return None,
            };
            let nanos = map.get("nanos").and_then(Value::as_u64).unwrap_or(0);
            DateTime::from_timestamp(seconds, u32::try_from(nanos).ok()?)
        }
        _ => None,
    }
}

/// A text payload, split into fields when it follows the application's log
/// line format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParsedRecord {
    /// `YYYY-MM-DD HH:MM:SS,mmm - [LEVEL] - module - (file:line) - message`
    Structured {
        /// Timestamp as written by the application.
        timestamp: String,
        /// Bracketed severity token.
        severity: String,
        /// Dotted module path.
        module: String,
        /// Source file.
        file: String,
        /// Source line.
        line: u64,
        /// Message with surrounding whitespace removed.
        message: String,
    },
    /// Anything else: tracebacks, plain strings, request lines.
    Unstructured {
        /// The payload, unchanged.
        message: String,
    },
}

impl ParsedRecord {
    /// Returns the message of either variant.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Structured { message, .. } | Self::Unstructured { message } => message,
        }
    }

    /// Returns true for the structured variant.
    #[must_use]
    pub const fn is_structured(&self) -> bool {
        matches!(self, Self::Structured { .. })
    }
}

/// One kept upstream entry, ready to send to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEnvelope {
    /// The parsed payload.
    #[serde(rename = "log")]
    pub record: ParsedRecord,
    /// Upstream timestamp as ISO-8601 UTC with millisecond precision.
    pub original_timestamp: String,
    /// Upstream severity, or [`DEFAULT_SEVERITY`].
    pub severity: String,
}

impl LogEnvelope {
    /// Builds the envelope for an entry, stamping missing timestamps with now.
    ///
    /// Returns `None` for entries without a text payload.
    #[must_use]
    pub fn from_entry(entry: &RawEntry) -> Option<Self> {
        Self::from_entry_at(entry, Utc::now())
    }

    /// Builds the envelope for an entry, stamping missing timestamps with `now`.
    #[must_use]
    pub fn from_entry_at(entry: &RawEntry, now: DateTime<Utc>) -> Option<Self> {
        let text = entry.text()?;
        let timestamp = entry.timestamp.unwrap_or(now);
        Some(Self {
            record: parse_record(text),
            original_timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            severity: entry
                .severity
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SEVERITY.to_string()),
        })
    }
}

/// Turns one upstream batch into envelopes, dropping entries without text and
/// keeping upstream order.
#[must_use]
pub fn envelopes_from_batch(entries: &[RawEntry]) -> Vec<LogEnvelope> {
    let now = Utc::now();
    entries
        .iter()
        .filter_map(|entry| LogEnvelope::from_entry_at(entry, now))
        .collect()
}

/// Serializes envelopes into the JSON array frame sent to viewers.
pub fn encode_batch(envelopes: &[LogEnvelope]) -> Result<String> {
    Ok(serde_json::to_string(envelopes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const STRUCTURED: &str =
        "2024-01-01 10:00:00,000 - [INFO] - myapp.worker - (worker.py:42) - Processed batch";

    #[test]
    fn entry_without_payload_is_dropped() {
        assert!(LogEnvelope::from_entry(&RawEntry::default()).is_none());
        assert!(LogEnvelope::from_entry(&RawEntry::with_text("")).is_none());
    }

    #[test]
    fn severity_defaults() {
        let envelope = LogEnvelope::from_entry(&RawEntry::with_text("hello")).unwrap();
        assert_eq!(envelope.severity, DEFAULT_SEVERITY);

        let envelope =
            LogEnvelope::from_entry(&RawEntry::with_text("hello").severity("ERROR")).unwrap();
        assert_eq!(envelope.severity, "ERROR");
    }

    #[test]
    fn timestamp_is_iso_millis() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let envelope = LogEnvelope::from_entry(&RawEntry::with_text("x").timestamp(ts)).unwrap();
        assert_eq!(envelope.original_timestamp, "2024-01-01T10:00:00.123Z");
    }

    #[test]
    fn missing_timestamp_uses_now() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();
        let envelope = LogEnvelope::from_entry_at(&RawEntry::with_text("x"), now).unwrap();
        assert_eq!(envelope.original_timestamp, "2025-06-01T12:30:00.000Z");

        let before = Utc::now();
        let envelope = LogEnvelope::from_entry(&RawEntry::with_text("x")).unwrap();
        let stamped = DateTime::parse_from_rfc3339(&envelope.original_timestamp).unwrap();
        let delta = stamped.with_timezone(&Utc) - before;
        assert!(delta.num_seconds().abs() < 5);
    }

    #[test]
    fn batch_filters_and_keeps_order() {
        let batch = vec![
            RawEntry::with_text("first"),
            RawEntry::default().severity("INFO"),
            RawEntry::with_text(STRUCTURED),
            RawEntry::with_text(""),
            RawEntry::with_text("last"),
        ];

        let envelopes = envelopes_from_batch(&batch);

        let messages: Vec<_> = envelopes.iter().map(|e| e.record.message()).collect();
        assert_eq!(messages, vec!["first", "Processed batch", "last"]);
    }

    #[test]
    fn deserializes_rest_entry() {
        let json = r#"{
            "insertId": "abc123",
            "textPayload": "hello",
            "timestamp": "2024-01-01T10:00:00.250Z",
            "severity": "WARNING",
            "resource": {"type": "cloud_run_revision"}
        }"#;

        let entry: RawEntry = serde_json::from_str(json).unwrap();

        assert_eq!(entry.text(), Some("hello"));
        assert_eq!(entry.severity.as_deref(), Some("WARNING"));
        assert_eq!(entry.insert_id.as_deref(), Some("abc123"));
        assert_eq!(
            entry.timestamp.unwrap().timestamp_millis(),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap().timestamp_millis() + 250
        );
    }

    #[test]
    fn deserializes_seconds_nanos_timestamp() {
        let json = r#"{"textPayload":"x","timestamp":{"seconds":"1704103200","nanos":5000000}}"#;
        let entry: RawEntry = serde_json::from_str(json).unwrap();
        let envelope = LogEnvelope::from_entry(&entry).unwrap();
        assert_eq!(envelope.original_timestamp, "2024-01-01T10:00:00.005Z");

        let json = r#"{"textPayload":"x","timestamp":{"seconds":1704103200}}"#;
        let entry: RawEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.timestamp.unwrap().timestamp(), 1_704_103_200);
    }

    #[test]
    fn unreadable_timestamp_is_absent() {
        let json = r#"{"textPayload":"x","timestamp":"yesterday"}"#;
        let entry: RawEntry = serde_json::from_str(json).unwrap();
        assert!(entry.timestamp.is_none());
    }

    #[test]
    fn envelope_wire_format() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let entry = RawEntry::with_text(STRUCTURED).timestamp(ts).severity("INFO");
        let envelope = LogEnvelope::from_entry(&entry).unwrap();

        let json: Value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["originalTimestamp"], "2024-01-01T10:00:00.000Z");
        assert_eq!(json["severity"], "INFO");
        assert_eq!(json["log"]["type"], "structured");
        assert_eq!(json["log"]["module"], "myapp.worker");
        assert_eq!(json["log"]["line"], 42);
    }

    #[test]
    fn encode_batch_is_json_array() {
        let envelopes = envelopes_from_batch(&[RawEntry::with_text("a"), RawEntry::with_text("b")]);
        let frame = encode_batch(&envelopes).unwrap();

        let decoded: Vec<LogEnvelope> = serde_json::from_str(&frame).unwrap();
        assert_eq!(decoded, envelopes);
        assert!(frame.starts_with('['));
    }

    #[test]
    fn unstructured_wire_format() {
        let record = ParsedRecord::Unstructured {
            message: "plain".to_string(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"type":"unstructured","message":"plain"}"#);
    }
}

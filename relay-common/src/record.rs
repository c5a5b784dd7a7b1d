//! Record model consumed by the sink pipeline.
//!
//! Records arrive from the broker host already decoded into these types;
//! the pipeline never touches broker client types directly.

use serde_json::Value;

/// One offset-addressed record pulled from a source partition.
///
/// Immutable within the pipeline; the host keeps it alive until the
/// record's processing terminates.
#[derive(Debug, Clone)]
pub struct SinkRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Broker timestamp in epoch milliseconds, when the broker carried one.
    pub timestamp: Option<i64>,
    pub key: Option<String>,
    /// Ordered as they appeared on the source record.
    pub headers: Vec<RecordHeader>,
    pub value: RecordValue,
}

impl SinkRecord {
    /// `topic-partition@offset`, the coordinate string used in logs.
    pub fn coordinates(&self) -> String {
        format!("{}-{}@{}", self.topic, self.partition, self.offset)
    }
}

#[derive(Debug, Clone)]
pub struct RecordHeader {
    pub name: String,
    pub value: HeaderValue,
}

impl RecordHeader {
    pub fn new(name: impl Into<String>, value: HeaderValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Typed header value as carried on broker records.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Text(String),
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl HeaderValue {
    /// Canonical text rendering used when forwarding headers.
    ///
    /// `None` means the header has no textual form (null, or bytes that
    /// are not UTF-8) and is skipped by forwarding.
    ///
    /// ```
    /// use relay_common::HeaderValue;
    ///
    /// assert_eq!(HeaderValue::Int(42).as_text().as_deref(), Some("42"));
    /// assert_eq!(HeaderValue::Bool(true).as_text().as_deref(), Some("true"));
    /// assert_eq!(HeaderValue::Null.as_text(), None);
    /// assert_eq!(HeaderValue::Bytes(vec![0xff]).as_text(), None);
    /// ```
    pub fn as_text(&self) -> Option<String> {
        match self {
            HeaderValue::Text(s) => Some(s.clone()),
            HeaderValue::Bytes(b) => String::from_utf8(b.clone()).ok(),
            HeaderValue::Int(i) => Some(i.to_string()),
            HeaderValue::Float(f) => Some(f.to_string()),
            HeaderValue::Bool(b) => Some(b.to_string()),
            HeaderValue::Null => None,
        }
    }
}

/// The value side of a source record.
///
/// `Structured` covers everything that arrived already shaped: maps,
/// schema-described structs and bare primitives all deserialize into a
/// [`serde_json::Value`] upstream of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Null,
    Text(String),
    Bytes(Vec<u8>),
    Structured(Value),
}

impl RecordValue {
    /// Null detection applied before any conversion work.
    pub fn is_null(&self) -> bool {
        matches!(self, RecordValue::Null | RecordValue::Structured(Value::Null))
    }
}

/// Terminal failure names carried on error-topic records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ConversionError,
    NullValue,
    HttpError,
    RetryExhausted,
    HttpException,
    ProcessingError,
}

impl FailureKind {
    /// Wire name, as downstream consumers match on it.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ConversionError => "CONVERSION_ERROR",
            FailureKind::NullValue => "NULL_VALUE",
            FailureKind::HttpError => "HTTP_ERROR",
            FailureKind::RetryExhausted => "RETRY_EXHAUSTED",
            FailureKind::HttpException => "HTTP_EXCEPTION",
            FailureKind::ProcessingError => "PROCESSING_ERROR",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Structured description of a terminal per-record failure.
//!
//! The report is built by the pipeline at the moment a record fails for
//! good, and rendered by the error route into the error-record value and
//! headers. Header values are UTF-8 text; integers use their decimal
//! rendering.

use chrono::Utc;
use relay_common::{FailureKind, SinkRecord};
use relay_http::EndpointResponse;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub message: String,
    /// Epoch milliseconds at which the failure was declared terminal.
    pub timestamp_ms: i64,
    /// HTTP attempts behind this failure, when any were made.
    pub retry_count: Option<u32>,
    pub http_status: Option<u16>,
    pub http_body: Option<String>,
    /// Response headers of the final attempt, when a response exists.
    pub response_headers: Vec<(String, String)>,
}

impl FailureReport {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
            retry_count: None,
            http_status: None,
            http_body: None,
            response_headers: Vec::new(),
        }
    }

    pub fn with_response(mut self, response: &EndpointResponse) -> Self {
        self.http_status = Some(response.status);
        self.http_body = response.body.clone();
        self.response_headers = response.headers.clone();
        self
    }

    pub fn with_retry_count(mut self, attempts: u32) -> Self {
        self.retry_count = Some(attempts);
        self
    }

    /// The error-record value: a JSON object with a fixed key set.
    pub fn to_value(&self, record: &SinkRecord) -> Value {
        let mut doc = serde_json::Map::new();
        doc.insert("errorType".to_string(), json!(self.kind.as_str()));
        doc.insert("errorMessage".to_string(), json!(self.message));
        doc.insert("errorTimestamp".to_string(), json!(self.timestamp_ms));
        if let Some(retries) = self.retry_count {
            doc.insert("retryCount".to_string(), json!(retries));
        }
        if let Some(status) = self.http_status {
            doc.insert("httpStatusCode".to_string(), json!(status));
        }
        if let Some(body) = &self.http_body {
            doc.insert("httpResponseBody".to_string(), json!(body));
        }
        doc.insert("originalTopic".to_string(), json!(record.topic));
        doc.insert("originalPartition".to_string(), json!(record.partition));
        doc.insert("originalOffset".to_string(), json!(record.offset));
        Value::Object(doc)
    }

    /// Error-record headers: original record headers, the final
    /// response's headers under `http.response.`, then error metadata.
    pub fn headers(&self, record: &SinkRecord) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();

        for h in &record.headers {
            if let Some(value) = h.value.as_text() {
                out.push((h.name.clone(), value));
            }
        }
        for (name, value) in &self.response_headers {
            out.push((format!("http.response.{name}"), value.clone()));
        }

        out.push(("error.type".to_string(), self.kind.as_str().to_string()));
        out.push(("error.message".to_string(), self.message.clone()));
        out.push(("error.timestamp".to_string(), self.timestamp_ms.to_string()));
        if let Some(status) = self.http_status {
            out.push(("error.http.status.code".to_string(), status.to_string()));
        }
        if let Some(retries) = self.retry_count {
            out.push(("error.retry.count".to_string(), retries.to_string()));
        }
        out.push(("kafka.original.topic".to_string(), record.topic.clone()));
        out.push(("kafka.original.partition".to_string(), record.partition.to_string()));
        out.push(("kafka.original.offset".to_string(), record.offset.to_string()));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::{HeaderValue, RecordHeader, RecordValue};

    fn record() -> SinkRecord {
        SinkRecord {
            topic: "events".into(),
            partition: 2,
            offset: 400,
            timestamp: Some(1_700_000_000_000),
            key: Some("k1".into()),
            headers: vec![RecordHeader::new("trace-id", HeaderValue::Text("t1".into()))],
            value: RecordValue::Text("{}".into()),
        }
    }

    fn response() -> EndpointResponse {
        EndpointResponse {
            status: 503,
            headers: vec![("retry-after".into(), "1".into())],
            body: Some("busy".into()),
            elapsed_ms: 12,
        }
    }

    #[test]
    fn value_carries_the_fixed_key_set() {
        let report = FailureReport::new(FailureKind::RetryExhausted, "gave up")
            .with_response(&response())
            .with_retry_count(3);
        let doc = report.to_value(&record());

        assert_eq!(doc["errorType"], "RETRY_EXHAUSTED");
        assert_eq!(doc["errorMessage"], "gave up");
        assert!(doc["errorTimestamp"].as_i64().unwrap() > 0);
        assert_eq!(doc["retryCount"], 3);
        assert_eq!(doc["httpStatusCode"], 503);
        assert_eq!(doc["httpResponseBody"], "busy");
        assert_eq!(doc["originalTopic"], "events");
        assert_eq!(doc["originalPartition"], 2);
        assert_eq!(doc["originalOffset"], 400);
    }

    #[test]
    fn optional_keys_are_absent_without_a_response() {
        let doc = FailureReport::new(FailureKind::NullValue, "record value is null")
            .to_value(&record());
        assert_eq!(doc["errorType"], "NULL_VALUE");
        assert!(doc.get("retryCount").is_none());
        assert!(doc.get("httpStatusCode").is_none());
        assert!(doc.get("httpResponseBody").is_none());
    }

    #[test]
    fn headers_layer_originals_response_then_error_metadata() {
        let report = FailureReport::new(FailureKind::HttpError, "404")
            .with_response(&response())
            .with_retry_count(0);
        let headers = report.headers(&record());

        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        let trace = names.iter().position(|n| *n == "trace-id").unwrap();
        let resp = names
            .iter()
            .position(|n| *n == "http.response.retry-after")
            .unwrap();
        let err = names.iter().position(|n| *n == "error.type").unwrap();
        assert!(trace < resp && resp < err);

        assert!(headers.contains(&("kafka.original.topic".into(), "events".into())));
        assert!(headers.contains(&("kafka.original.partition".into(), "2".into())));
        assert!(headers.contains(&("kafka.original.offset".into(), "400".into())));
        assert!(headers.contains(&("error.http.status.code".into(), "503".into())));
    }
}

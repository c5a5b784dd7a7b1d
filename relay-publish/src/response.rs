//! Response-topic publication.
//!
//! Record assembly is a pure function so the layout is testable without
//! a broker; [`KafkaResponsePublisher`] wraps it in the durable producer
//! profile (all acks, idempotent, single in-flight request, compressed).

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use relay_common::{HeaderValue, RelayError, Result, SinkRecord};
use relay_config::{ResponseTopicConfig, ValueFormat};
use relay_http::EndpointResponse;

use crate::topic::resolve_topic;
use crate::ResponseRoute;

/// A fully assembled record, ready for the producer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRecord {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
}

/// Assemble the response record for one concluded HTTP exchange.
///
/// Header order is part of the contract: forwarded original headers
/// first, then the HTTP response headers under `http.response.`, then
/// request metadata.
pub fn build_response_record(
    cfg: &ResponseTopicConfig,
    template: &str,
    record: &SinkRecord,
    response: &EndpointResponse,
) -> ResponseRecord {
    let mut headers: Vec<(String, Vec<u8>)> = Vec::new();

    if cfg.include_original_headers {
        for h in &record.headers {
            if !cfg.original_headers_include.is_empty()
                && !cfg.original_headers_include.contains(&h.name)
            {
                continue;
            }
            match &h.value {
                HeaderValue::Bytes(b) => headers.push((h.name.clone(), b.clone())),
                other => {
                    if let Some(text) = other.as_text() {
                        headers.push((h.name.clone(), text.into_bytes()));
                    }
                }
            }
        }
    }

    for (name, value) in &response.headers {
        headers.push((format!("http.response.{name}"), value.clone().into_bytes()));
    }

    if cfg.include_request_metadata {
        headers.push(("http.status.code".into(), response.status.to_string().into_bytes()));
        headers.push((
            "http.response.time.ms".into(),
            response.elapsed_ms.to_string().into_bytes(),
        ));
        headers.push(("kafka.original.topic".into(), record.topic.clone().into_bytes()));
        headers.push((
            "kafka.original.partition".into(),
            record.partition.to_string().into_bytes(),
        ));
        headers.push((
            "kafka.original.offset".into(),
            record.offset.to_string().into_bytes(),
        ));
        if let Some(ts) = record.timestamp {
            headers.push(("kafka.timestamp".into(), ts.to_string().into_bytes()));
        }
    }

    let payload = response.body.as_ref().map(|body| {
        if cfg.value_format == ValueFormat::Json
            && serde_json::from_str::<serde_json::Value>(body).is_err()
        {
            // Forward the bytes verbatim anyway; the format knob only
            // adds validation, never rewrites the payload.
            tracing::warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "response body is not valid JSON, forwarding as string"
            );
        }
        body.clone().into_bytes()
    });

    ResponseRecord {
        topic: resolve_topic(template, &record.topic),
        key: if cfg.include_original_key {
            record.key.clone()
        } else {
            None
        },
        payload,
        headers,
    }
}

pub struct KafkaResponsePublisher {
    producer: FutureProducer,
    cfg: ResponseTopicConfig,
    template: String,
}

impl KafkaResponsePublisher {
    /// Durable producer profile; per-partition order is preserved by the
    /// single in-flight request.
    pub fn new(bootstrap_servers: &str, cfg: ResponseTopicConfig) -> Result<Self> {
        let template = cfg
            .name
            .clone()
            .ok_or_else(|| RelayError::Config("response.name is required".into()))?;
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("client.id", "relay-response-publisher")
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "1")
            .set("compression.type", "lz4")
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| RelayError::Config(format!("response producer init failed: {e}")))?;
        Ok(Self {
            producer,
            cfg,
            template,
        })
    }
}

#[async_trait]
impl ResponseRoute for KafkaResponsePublisher {
    async fn publish(&self, record: &SinkRecord, response: &EndpointResponse) -> Result<()> {
        let assembled = build_response_record(&self.cfg, &self.template, record, response);

        let mut headers = OwnedHeaders::new_with_capacity(assembled.headers.len());
        for (name, value) in &assembled.headers {
            headers = headers.insert(Header {
                key: name,
                value: Some(value),
            });
        }

        let mut outgoing: FutureRecord<'_, String, Vec<u8>> =
            FutureRecord::to(&assembled.topic).headers(headers);
        if let Some(key) = &assembled.key {
            outgoing = outgoing.key(key);
        }
        if let Some(payload) = &assembled.payload {
            outgoing = outgoing.payload(payload);
        }

        self.producer
            .send(outgoing, Duration::from_secs(30))
            .await
            .map_err(|(e, _)| RelayError::Publish(format!("response send failed: {e}")))?;

        tracing::debug!(
            source = %record.coordinates(),
            topic = %assembled.topic,
            "response published"
        );
        Ok(())
    }

    async fn flush(&self, deadline: Duration) -> Result<()> {
        self.producer
            .flush(deadline)
            .map_err(|e| RelayError::Publish(format!("response producer flush failed: {e}")))
    }
}

//! Error-topic publication.
//!
//! Fire-and-forget by contract: a failed or slow error send is logged
//! and dropped, never raised, and never triggers another error record.
//! The producer profile is deliberately weaker than the response route:
//! leader ack only, one librdkafka retry, five second message timeout.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use relay_common::{RelayError, Result, SinkRecord};
use relay_config::ErrorTopicConfig;

use crate::report::FailureReport;
use crate::topic::resolve_topic;
use crate::FailureRoute;

const SEND_DEADLINE: Duration = Duration::from_secs(5);

pub struct KafkaErrorPublisher {
    producer: FutureProducer,
    template: String,
}

impl KafkaErrorPublisher {
    pub fn new(bootstrap_servers: &str, cfg: &ErrorTopicConfig) -> Result<Self> {
        let template = cfg
            .name
            .clone()
            .ok_or_else(|| RelayError::Config("errors.name is required".into()))?;
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("client.id", "relay-error-publisher")
            .set("acks", "1")
            .set("retries", "1")
            .set("message.timeout.ms", "5000")
            .set("request.timeout.ms", "3000")
            .create()
            .map_err(|e| RelayError::Config(format!("error producer init failed: {e}")))?;
        Ok(Self { producer, template })
    }
}

#[async_trait]
impl FailureRoute for KafkaErrorPublisher {
    async fn publish(&self, record: &SinkRecord, report: &FailureReport) {
        let topic = resolve_topic(&self.template, &record.topic);
        let payload = report.to_value(record).to_string();

        let header_pairs = report.headers(record);
        let mut headers = OwnedHeaders::new_with_capacity(header_pairs.len());
        for (name, value) in &header_pairs {
            headers = headers.insert(Header {
                key: name,
                value: Some(value.as_bytes()),
            });
        }

        let mut outgoing: FutureRecord<'_, String, String> =
            FutureRecord::to(&topic).payload(&payload).headers(headers);
        if let Some(key) = &record.key {
            outgoing = outgoing.key(key);
        }

        // The await is bounded by message.timeout.ms; either way the
        // outcome stays in this method.
        match self.producer.send(outgoing, SEND_DEADLINE).await {
            Ok(_) => tracing::debug!(
                source = %record.coordinates(),
                topic = %topic,
                error_type = %report.kind,
                "error record published"
            ),
            Err((e, _)) => tracing::warn!(
                source = %record.coordinates(),
                topic = %topic,
                error_type = %report.kind,
                error = %e,
                "error record dropped"
            ),
        }
    }

    async fn flush(&self, deadline: Duration) {
        if let Err(e) = self.producer.flush(deadline) {
            tracing::warn!(error = %e, "error producer flush incomplete");
        }
    }
}

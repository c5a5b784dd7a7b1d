//! Side-channel publication to the broker.
//!
//! Two routes with very different reliability stories:
//!
//! - [`ResponseRoute`]: echoes successful (or terminal) HTTP responses to
//!   the response topic. Durable producer — all acks, idempotent, one
//!   in-flight request so per-partition order matches source offsets.
//! - [`FailureRoute`]: carries terminal per-record failures to the error
//!   topic. Best-effort producer — leader ack, short timeouts, and a
//!   publish that never raises to the caller.
//!
//! Both are traits so the pipeline can run against recording fakes in
//! tests; the Kafka implementations live in [`response`] and [`error`].

use async_trait::async_trait;
use std::time::Duration;

use relay_common::{Result, SinkRecord};
use relay_http::EndpointResponse;

pub mod error;
pub mod report;
pub mod response;
pub mod topic;

pub use error::KafkaErrorPublisher;
pub use report::FailureReport;
pub use response::KafkaResponsePublisher;
pub use topic::resolve_topic;

/// Durable route for concluded HTTP responses.
#[async_trait]
pub trait ResponseRoute: Send + Sync {
    /// Publish one response record. Failures surface so the pipeline can
    /// log them, but callers treat the source record as processed either
    /// way — the upstream HTTP call already happened.
    async fn publish(&self, record: &SinkRecord, response: &EndpointResponse) -> Result<()>;

    /// Drain in-flight sends within `deadline`.
    async fn flush(&self, deadline: Duration) -> Result<()>;
}

/// Best-effort route for terminal failures.
#[async_trait]
pub trait FailureRoute: Send + Sync {
    /// Publish one error record. Never raises; a lost error record is
    /// logged and dropped.
    async fn publish(&self, record: &SinkRecord, report: &FailureReport);

    /// Best-effort drain; errors are swallowed.
    async fn flush(&self, deadline: Duration);
}

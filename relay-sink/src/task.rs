//! The sink task: batch intake, the per-record state machine, teardown.

use std::time::Duration;

use async_trait::async_trait;
use relay_auth::Credentials;
use relay_common::{FailureKind, RelayError, Result, SinkRecord};
use relay_config::{BehaviourConfig, ErrorMode, NullValueMode, RelayConfig, RetryConfig};
use relay_http::{ClientOptions, EndpointClient, EndpointResponse, RetryPolicy};
use relay_publish::{
    FailureReport, FailureRoute, KafkaErrorPublisher, KafkaResponsePublisher, ResponseRoute,
};
use tokio_util::sync::CancellationToken;

use crate::request::RequestFactory;

const RESPONSE_FLUSH_DEADLINE: Duration = Duration::from_secs(10);
const ERROR_FLUSH_DEADLINE: Duration = Duration::from_secs(2);

/// Lifecycle contract between the host and a sink task.
///
/// The host commits offsets for a batch only when `put` returns `Ok`;
/// an `Err` is a batch failure and halts the commit.
#[async_trait]
pub trait SinkTask: Send {
    async fn put(&mut self, batch: Vec<SinkRecord>) -> Result<()>;

    /// Stop intake and drain owned resources within bounded deadlines.
    async fn stop(&mut self) -> Result<()>;
}

/// The HTTP sink pipeline. One instance per task; records are processed
/// strictly in batch order.
pub struct HttpSinkTask {
    factory: RequestFactory,
    credentials: Credentials,
    client: EndpointClient,
    policy: RetryPolicy,
    behaviour: BehaviourConfig,
    response_route: Option<Box<dyn ResponseRoute>>,
    failure_route: Option<Box<dyn FailureRoute>>,
    cancel: CancellationToken,
}

fn policy_from(cfg: &RetryConfig) -> RetryPolicy {
    RetryPolicy {
        enabled: cfg.enabled,
        max_attempts: cfg.max_attempts,
        backoff_initial: Duration::from_millis(cfg.backoff_initial_ms),
        backoff_max: Duration::from_millis(cfg.backoff_max_ms),
        backoff_multiplier: cfg.backoff_multiplier,
        retry_statuses: cfg.on_status_codes.clone(),
    }
}

impl HttpSinkTask {
    /// Build the task with Kafka-backed publication routes.
    pub fn from_config(cfg: &RelayConfig, cancel: CancellationToken) -> Result<Self> {
        let response_route: Option<Box<dyn ResponseRoute>> = if cfg.response.enabled {
            Some(Box::new(KafkaResponsePublisher::new(
                &cfg.broker.bootstrap_servers,
                cfg.response.clone(),
            )?))
        } else {
            None
        };
        let failure_route: Option<Box<dyn FailureRoute>> = if cfg.errors.enabled {
            Some(Box::new(KafkaErrorPublisher::new(
                &cfg.broker.bootstrap_servers,
                &cfg.errors,
            )?))
        } else {
            None
        };
        Self::with_routes(cfg, response_route, failure_route, cancel)
    }

    /// Build the task with caller-supplied routes (tests, embedding).
    pub fn with_routes(
        cfg: &RelayConfig,
        response_route: Option<Box<dyn ResponseRoute>>,
        failure_route: Option<Box<dyn FailureRoute>>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        cfg.validate()?;

        let per_host = match (
            cfg.endpoint.max_connections_per_host,
            cfg.endpoint.max_connections_total,
        ) {
            (Some(per_host), Some(total)) => Some(per_host.min(total)),
            (per_host, total) => per_host.or(total),
        };
        let client = EndpointClient::new(ClientOptions {
            connect_timeout: Duration::from_millis(cfg.endpoint.connect_timeout_ms),
            request_timeout: Duration::from_millis(cfg.endpoint.request_timeout_ms),
            max_connections_per_host: per_host,
        })?;

        tracing::info!(
            url = %cfg.endpoint.url,
            method = cfg.endpoint.method.as_str(),
            response_topic = cfg.response.enabled,
            error_topic = cfg.errors.enabled,
            retry_attempts = cfg.retry.max_attempts,
            "sink task ready"
        );

        Ok(Self {
            factory: RequestFactory::new(&cfg.endpoint, &cfg.headers)?,
            credentials: Credentials::from_config(&cfg.auth)?,
            client,
            policy: policy_from(&cfg.retry),
            behaviour: cfg.behaviour.clone(),
            response_route,
            failure_route,
            cancel,
        })
    }

    async fn process_record(&self, record: &SinkRecord) -> Result<()> {
        if record.value.is_null() {
            return self.handle_null(record).await;
        }

        let prepared = match self.factory.prepare(record) {
            Ok(prepared) => prepared,
            Err(e) => return self.terminal_conversion(record, e).await,
        };

        let mut attempt: u32 = 0;
        loop {
            // Materialized fresh each attempt so a rotated token is
            // picked up between retries.
            let material = match self.credentials.materialize().await {
                Ok(material) => material,
                Err(e) => {
                    return self
                        .terminal_exception(record, FailureKind::HttpException, e, attempt)
                        .await;
                }
            };
            let request = self.factory.build(&prepared, material);

            match self.client.send(&request).await {
                Ok(response) if response.is_success() => {
                    tracing::debug!(
                        source = %record.coordinates(),
                        status = response.status,
                        attempts = attempt + 1,
                        "record forwarded"
                    );
                    self.maybe_publish_response(record, &response).await;
                    return Ok(());
                }
                Ok(response) => {
                    let retryable = self.policy.retries_status(response.status);
                    if retryable && self.policy.has_more_attempts(attempt) {
                        self.backoff(record, attempt).await?;
                        attempt += 1;
                        continue;
                    }
                    // The terminal response is published before the
                    // failure record, response route first.
                    self.maybe_publish_response(record, &response).await;
                    let attempts_made = attempt + 1;
                    return if retryable {
                        self.terminal_status(
                            record,
                            FailureKind::RetryExhausted,
                            response,
                            attempts_made,
                        )
                        .await
                    } else {
                        self.terminal_status(
                            record,
                            FailureKind::HttpError,
                            response,
                            attempts_made - 1,
                        )
                        .await
                    };
                }
                Err(fault) => {
                    if self.policy.retries_fault(&fault) && self.policy.has_more_attempts(attempt)
                    {
                        self.backoff(record, attempt).await?;
                        attempt += 1;
                        continue;
                    }
                    let attempts_made = attempt + 1;
                    let kind = if self.policy.retries_fault(&fault) {
                        FailureKind::RetryExhausted
                    } else {
                        FailureKind::HttpException
                    };
                    return self
                        .terminal_exception(record, kind, RelayError::Transport(fault), attempts_made)
                        .await;
                }
            }
        }
    }

    async fn handle_null(&self, record: &SinkRecord) -> Result<()> {
        if let Some(route) = &self.failure_route {
            let report = FailureReport::new(FailureKind::NullValue, "record value is null");
            route.publish(record, &report).await;
            return Ok(());
        }
        match self.behaviour.on_null_value {
            NullValueMode::Ignore => {
                tracing::debug!(source = %record.coordinates(), "null value skipped");
                Ok(())
            }
            NullValueMode::Fail => Err(RelayError::NullValue),
        }
    }

    async fn terminal_conversion(&self, record: &SinkRecord, err: RelayError) -> Result<()> {
        if let Some(route) = &self.failure_route {
            let kind = match &err {
                RelayError::Conversion(_) => FailureKind::ConversionError,
                _ => FailureKind::ProcessingError,
            };
            route
                .publish(record, &FailureReport::new(kind, err.to_string()))
                .await;
            return Ok(());
        }
        Err(err)
    }

    async fn terminal_exception(
        &self,
        record: &SinkRecord,
        kind: FailureKind,
        err: RelayError,
        attempts: u32,
    ) -> Result<()> {
        if let Some(route) = &self.failure_route {
            let report = FailureReport::new(kind, err.to_string()).with_retry_count(attempts);
            route.publish(record, &report).await;
            return Ok(());
        }
        Err(err)
    }

    async fn terminal_status(
        &self,
        record: &SinkRecord,
        kind: FailureKind,
        response: EndpointResponse,
        retry_count: u32,
    ) -> Result<()> {
        if let Some(route) = &self.failure_route {
            let report = FailureReport::new(
                kind,
                format!("endpoint returned status {}", response.status),
            )
            .with_response(&response)
            .with_retry_count(retry_count);
            route.publish(record, &report).await;
            return Ok(());
        }
        match self.behaviour.on_error {
            ErrorMode::Log => {
                tracing::warn!(
                    source = %record.coordinates(),
                    status = response.status,
                    kind = %kind,
                    "record failed; continuing"
                );
                Ok(())
            }
            ErrorMode::Fail => Err(RelayError::HttpStatus {
                status: response.status,
            }),
        }
    }

    /// A publication failure never re-runs the HTTP call: the upstream
    /// endpoint already accepted the request.
    async fn maybe_publish_response(&self, record: &SinkRecord, response: &EndpointResponse) {
        if let Some(route) = &self.response_route {
            if let Err(e) = route.publish(record, response).await {
                tracing::warn!(
                    source = %record.coordinates(),
                    error = %e,
                    "response publication failed; record treated as processed"
                );
            }
        }
    }

    async fn backoff(&self, record: &SinkRecord, attempt: u32) -> Result<()> {
        let delay = self.policy.delay(attempt);
        tracing::debug!(
            source = %record.coordinates(),
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "backing off before retry"
        );
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RelayError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[async_trait]
impl SinkTask for HttpSinkTask {
    async fn put(&mut self, batch: Vec<SinkRecord>) -> Result<()> {
        for record in &batch {
            if self.cancel.is_cancelled() {
                return Err(RelayError::Cancelled);
            }
            self.process_record(record).await?;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(route) = &self.response_route {
            if let Err(e) = route.flush(RESPONSE_FLUSH_DEADLINE).await {
                tracing::warn!(error = %e, "response producer flush incomplete at stop");
            }
        }
        if let Some(route) = &self.failure_route {
            route.flush(ERROR_FLUSH_DEADLINE).await;
        }
        tracing::info!("sink task stopped");
        Ok(())
    }
}

//! Common types shared across the Relay workspace.
//!
//! This crate defines the record model handed to the sink pipeline, the
//! fault taxonomy every other crate reports through, and the centralised
//! tracing initialisation. It is intentionally lightweight so that all
//! crates can depend on it without heavy transitive costs.
//!
//! # Overview
//!
//! - [`SinkRecord`] and friends: the broker-side record model
//! - [`RelayError`] and [`Result`]: shared error handling
//! - [`FailureKind`]: the terminal failure names carried on error records
//! - [`observability`]: tracing/logging setup for binaries and tests
use thiserror::Error;

pub mod observability;
pub mod record;

pub use record::{FailureKind, HeaderValue, RecordHeader, RecordValue, SinkRecord};

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Transport-level fault classification for a single HTTP attempt.
///
/// The kind drives the retry decision: connection establishment, timeouts
/// and mid-stream I/O faults are transient; anything else is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} fault: {message}")]
pub struct TransportError {
    pub kind: TransportKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// TCP/TLS establishment failed.
    Connect,
    /// The attempt exceeded its deadline.
    Timeout,
    /// The connection dropped mid request/response.
    Io,
    /// Anything else (malformed URL, header rejected by the stack, ...).
    Other,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransportKind::Connect => "connect",
            TransportKind::Timeout => "timeout",
            TransportKind::Io => "io",
            TransportKind::Other => "transport",
        };
        f.write_str(label)
    }
}

impl TransportError {
    pub fn new(kind: TransportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// ```
    /// use relay_common::{TransportError, TransportKind};
    ///
    /// assert!(TransportError::new(TransportKind::Timeout, "deadline").is_retryable());
    /// assert!(!TransportError::new(TransportKind::Other, "bad header").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            TransportKind::Connect | TransportKind::Timeout | TransportKind::Io
        )
    }
}

/// Fault taxonomy for the sink.
///
/// Variants map one-to-one onto the terminal outcomes the pipeline
/// distinguishes; see `relay-sink` for how each one is routed.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Startup validation rejected the configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The record carried no value.
    #[error("record value is null")]
    NullValue,

    /// The record value could not be rendered into a request body.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// No usable credential could be materialized.
    #[error("auth error: {0}")]
    Auth(String),

    /// A single HTTP attempt failed below the status-code layer.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The endpoint answered with a terminal non-success status.
    #[error("endpoint returned status {status}")]
    HttpStatus { status: u16 },

    /// A producer send failed. Logged by callers, never propagated
    /// past the pipeline.
    #[error("publish error: {0}")]
    Publish(String),

    /// The task was asked to stop while a record was in flight.
    #[error("task cancelled")]
    Cancelled,
}

impl RelayError {
    /// Whether the retry loop may schedule another attempt for this fault.
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

//! Stateless retry decisions.
//!
//! The policy answers three questions: does this outcome warrant another
//! attempt, are there attempts left, and how long to wait before the
//! next one. The caller owns the attempt counter and performs the sleep,
//! so cancellation stays in one place.

use std::time::Duration;

use relay_common::TransportError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub backoff_multiplier: f64,
    /// Status codes that warrant another attempt.
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            backoff_initial: Duration::from_millis(1_000),
            backoff_max: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            retry_statuses: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries, whatever the outcome.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn retries_status(&self, status: u16) -> bool {
        self.enabled && self.retry_statuses.contains(&status)
    }

    pub fn retries_fault(&self, fault: &TransportError) -> bool {
        self.enabled && fault.is_retryable()
    }

    /// `attempt_index` is zero-based; attempt `max_attempts - 1` is the last.
    pub fn has_more_attempts(&self, attempt_index: u32) -> bool {
        self.enabled && attempt_index + 1 < self.max_attempts
    }

    /// Delay before attempt `attempt_index + 1`.
    ///
    /// `min(backoff_max, backoff_initial * multiplier^attempt_index)` —
    /// monotone in the attempt index and capped at the ceiling even when
    /// the exponential overflows.
    pub fn delay(&self, attempt_index: u32) -> Duration {
        let initial = self.backoff_initial.as_millis() as f64;
        let ceiling = self.backoff_max.as_millis() as f64;
        let raw = initial * self.backoff_multiplier.powi(attempt_index as i32);
        Duration::from_millis(raw.min(ceiling) as u64)
    }
}

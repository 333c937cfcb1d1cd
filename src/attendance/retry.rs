//! Conflict retry with exponential backoff
//!
//! Both protocol operations are idempotent, so a transaction that lost an
//! optimistic race is simply re-run from its first read.

use crate::error::{AttendanceError, Result};
use crate::metrics::MetricsCollector;
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Retry budget for conflicting transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, conflicts surface immediately
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Jittered exponential schedule; callers that lost the same commit race
    /// wake at different times
    pub fn backoff(&self) -> ExponentialBuilder {
        // backon counts retries, not attempts
        let max_retries = self.max_attempts.max(1).saturating_sub(1) as usize;

        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(max_retries)
            .with_jitter()
    }

    /// Run `attempt` until it succeeds, fails with a non-conflict error, or the
    /// budget is spent
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        metrics: &MetricsCollector,
        attempt: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0u32;

        let result = attempt
            .retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(|e: &AttendanceError| e.is_retryable())
            .notify(|e: &AttendanceError, delay: Duration| {
                retries += 1;
                metrics.record_transaction_conflict(operation);
                warn!(
                    "{} attempt {} conflicted: {}. Retrying in {:?}",
                    operation, retries, e, delay
                );
            })
            .await;

        result.map_err(|e| {
            if !e.is_retryable() {
                return e;
            }
            metrics.record_transaction_conflict(operation);
            error!(
                "{} still conflicting after {} attempts, giving up",
                operation,
                retries + 1
            );
            AttendanceError::TransactionConflict {
                operation: operation.to_string(),
            }
        })
    }
}

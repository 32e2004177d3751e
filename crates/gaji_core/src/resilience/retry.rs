//! Exponential retry for transient collaborator failures

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::config::RetryConfig;
use crate::{CoreError, Result};

/// Backoff schedule: `initial_delay`, then multiplied by `factor` per retry,
/// capped at `max_delay`. No jitter, so the schedule is exact.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub factor: f32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            factor: config.factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::new()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(self.max_retries)
    }

    /// Total attempts including the first one
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Run `op`, re-running it while `is_retryable` accepts the error and
    /// retries remain. Returns the last error once retries run out.
    pub async fn retry<T, E, F, Fut, P>(
        &self,
        operation: &str,
        op: F,
        is_retryable: P,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        P: FnMut(&E) -> bool,
        E: std::fmt::Display,
    {
        op.retry(self.backoff())
            .when(is_retryable)
            .notify(|e: &E, delay: Duration| {
                tracing::warn!(operation, error = %e, ?delay, "transient failure, retrying");
            })
            .await
    }
}

/// Retry `op` on transient [`CoreError`]s under `policy`.
///
/// Non-transient errors are returned as-is after the first failure. When the
/// retries run out the last error is reported as
/// [`CoreError::ExternalUnavailable`] carrying the attempt count.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, service: &str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = AtomicUsize::new(0);
    let mut op = op;

    let result = policy
        .retry(
            service,
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                op()
            },
            CoreError::is_transient,
        )
        .await;

    let attempts = attempts.load(Ordering::Relaxed);
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_transient() => {
            tracing::error!(service, attempts, error = %e, "giving up after retries");
            Err(exhausted(service, attempts, e))
        }
        Err(e) => Err(e),
    }
}

fn exhausted(service: &str, attempts: usize, last: CoreError) -> CoreError {
    match last {
        CoreError::ExternalUnavailable { cause, .. } => CoreError::ExternalUnavailable {
            service: service.to_string(),
            attempts,
            cause,
        },
        other => CoreError::ExternalUnavailable {
            service: service.to_string(),
            attempts,
            cause: Box::new(other),
        },
    }
}

//! Fault isolation for calls to external collaborators

pub mod circuit_breaker;
pub mod retry;

use std::future::Future;
use std::time::Duration;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use retry::{RetryPolicy, retry_transient};

use crate::{CoreError, Result};

/// Bound `fut` by `after`, mapping expiry to [`CoreError::Timeout`].
pub async fn with_timeout<T, Fut>(service: &str, after: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(service, ?after, "collaborator call timed out");
            Err(CoreError::timeout(service, after))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_core_error() {
        let result: Result<()> = with_timeout("vectordb", Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(6)).await;
            Ok(())
        })
        .await;

        match result {
            Err(CoreError::Timeout { service, after }) => {
                assert_eq!(service, "vectordb");
                assert_eq!(after, Duration::from_secs(5));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}

//! Per-collaborator circuit breaker
//!
//! `closed` passes calls through and counts consecutive failures. At the
//! threshold it opens and rejects calls without invoking them. Once the reset
//! timeout has elapsed since the last failure, the next caller runs as a single
//! half-open trial: success closes the breaker, failure reopens it.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::CoreError;
use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of a breaker for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Times the breaker has moved to `open` since it was created
    pub times_opened: u64,
}

/// Outcome of a call that went through a breaker
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker '{breaker}' is open")]
    Open {
        breaker: String,
        retry_after: Duration,
    },

    #[error(transparent)]
    Inner(E),
}

impl From<BreakerError<CoreError>> for CoreError {
    fn from(err: BreakerError<CoreError>) -> Self {
        match err {
            BreakerError::Open {
                breaker,
                retry_after,
            } => CoreError::CircuitOpen {
                breaker,
                retry_after,
            },
            BreakerError::Inner(e) => e,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    times_opened: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: config.reset_timeout(),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                last_failure_time: None,
                trial_in_flight: false,
                times_opened: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            reset_timeout_secs: self.reset_timeout.as_secs(),
            last_failure_time: inner.last_failure_time,
            times_opened: inner.times_opened,
        }
    }

    /// Run `f` through the breaker.
    ///
    /// Any `Err` from `f` counts as a failure, so callers that enforce a
    /// timeout should do so inside `f`.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = match self.acquire() {
            Ok(permit) => permit,
            Err(retry_after) => return Err(self.open_error(retry_after)),
        };

        match f().await {
            Ok(value) => {
                permit.settle();
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                permit.settle();
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Admit a call, or report how long until the breaker allows a trial.
    fn acquire(&self) -> Result<Permit<'_>, Duration> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.reset_timeout);
                if elapsed >= self.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!(breaker = %self.name, "circuit breaker half-open, allowing trial call");
                    Ok(Permit::new(self, true))
                } else {
                    Err(self.reset_timeout - elapsed)
                }
            }
            CircuitState::HalfOpen if inner.trial_in_flight => Err(Duration::ZERO),
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(Permit::new(self, true))
            }
        }
    }

    fn open_error<E>(&self, retry_after: Duration) -> BreakerError<E> {
        tracing::debug!(breaker = %self.name, ?retry_after, "circuit breaker rejected call");
        BreakerError::Open {
            breaker: self.name.clone(),
            retry_after,
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.trial_in_flight = false;
                tracing::info!(breaker = %self.name, "circuit breaker closed after successful trial");
            }
            CircuitState::Closed => inner.failure_count = 0,
            // a call admitted before the breaker opened; the outage still stands
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_time = Some(Utc::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.trial_in_flight = false;
                inner.times_opened += 1;
                tracing::warn!(breaker = %self.name, "trial call failed, circuit breaker reopened");
            }
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.times_opened += 1;
                tracing::warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    reset_timeout = ?self.reset_timeout,
                    "circuit breaker opened"
                );
            }
            _ => {}
        }
    }
}

/// Admission to run one call. Dropping an unsettled trial permit (the call's
/// future was cancelled) frees the half-open slot for the next caller.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            let mut inner = self.breaker.inner.lock();
            if inner.state == CircuitState::HalfOpen {
                inner.trial_in_flight = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "vectordb",
            &CircuitBreakerConfig {
                failure_threshold: 5,
                reset_timeout_secs: 60,
            },
        )
    }

    async fn fail(breaker: &CircuitBreaker) {
        let result: Result<(), _> = breaker.call(|| async { Err::<(), _>("boom") }).await;
        assert!(matches!(result, Err(BreakerError::Inner("boom"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_recovers() {
        let breaker = breaker();
        for _ in 0..5 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicUsize::new(0);
        let rejected = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        match rejected {
            Err(BreakerError::Open { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(60))
            }
            other => panic!("expected open rejection, got {:?}", other),
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(60)).await;

        let observed = breaker
            .call(|| async { Ok::<_, &str>(breaker.state()) })
            .await
            .unwrap();
        assert_eq!(observed, CircuitState::HalfOpen);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let breaker = breaker();
        for _ in 0..5 {
            fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(30)).await;
        let result = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        match result {
            Err(BreakerError::Open { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(30))
            }
            other => panic!("expected open rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let breaker = breaker();
        for _ in 0..4 {
            fail(&breaker).await;
        }
        breaker.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
        for _ in 0..4 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 4);
        assert!(breaker.snapshot().last_failure_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let breaker = Arc::new(breaker());
        for _ in 0..5 {
            fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(60)).await;

        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .call(|| async move {
                        let _ = gate_rx.await;
                        Ok::<_, &str>("trial")
                    })
                    .await
                    .map_err(|e| matches!(e, BreakerError::Open { .. }))
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let concurrent = futures::future::join_all(
            (0..3).map(|_| breaker.call(|| async { Ok::<_, &str>("other") })),
        )
        .await;
        assert!(
            concurrent
                .iter()
                .all(|r| matches!(r, Err(BreakerError::Open { .. })))
        );

        gate_tx.send(()).unwrap();
        assert_eq!(trial.await.unwrap().unwrap(), "trial");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    async fn fail_together(breaker: &Arc<CircuitBreaker>, callers: usize) {
        let barrier = Arc::new(tokio::sync::Barrier::new(callers));
        let tasks: Vec<_> = (0..callers)
            .map(|_| {
                let breaker = breaker.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    breaker
                        .call(|| async move {
                            barrier.wait().await;
                            Err::<(), _>("boom")
                        })
                        .await
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            assert!(matches!(result.unwrap(), Err(BreakerError::Inner("boom"))));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_all_counted() {
        let breaker = Arc::new(CircuitBreaker::new(
            "text_generator",
            &CircuitBreakerConfig {
                failure_threshold: 1_000,
                reset_timeout_secs: 60,
            },
        ));

        fail_together(&breaker, 200).await;

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.failure_count, 200);
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.times_opened, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_threshold_reached_concurrently_opens_once() {
        let breaker = Arc::new(breaker());

        fail_together(&breaker, 5).await;

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 5);
        assert_eq!(snapshot.times_opened, 1);
    }

    #[test]
    fn test_open_converts_to_core_error() {
        let err: CoreError = BreakerError::<CoreError>::Open {
            breaker: "gemini".to_string(),
            retry_after: Duration::from_secs(12),
        }
        .into();
        assert!(matches!(err, CoreError::CircuitOpen { ref breaker, .. } if breaker == "gemini"));
    }
}

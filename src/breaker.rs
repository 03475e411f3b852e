//! Generic circuit breaker wrapping fallible async calls.
//!
//! The breaker passes calls through while closed, rejects them while open,
//! and allows a limited number of trial calls while half-open. The
//! open-to-half-open transition is evaluated lazily at call time once the
//! reset timeout has elapsed; nothing here runs on a background timer, so
//! the breaker behaves in request-scoped environments where no thread
//! outlives the invocation.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through; consecutive failures are counted.
    Closed,
    /// Calls are rejected (or routed to a fallback) without being attempted.
    Open,
    /// A limited number of trial calls probe whether the dependency recovered.
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the call was not attempted.
    #[error("circuit breaker `{name}` is open")]
    Open {
        /// Name of the rejecting breaker.
        name: String,
    },
    /// The wrapped call ran and failed.
    #[error("{0}")]
    Inner(E),
}

/// Tuning knobs for a breaker instance.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing trial calls.
    pub reset_timeout: Duration,
    /// Consecutive half-open successes required to close again.
    pub half_open_max_attempts: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_attempts: 2,
        }
    }
}

type Observer = Box<dyn Fn(BreakerState, BreakerState) + Send + Sync>;

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure_at: Option<Instant>,
}

/// Closed/open/half-open wrapper around any fallible async call.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    observer: Option<Observer>,
}

impl CircuitBreaker {
    /// Create a breaker with the given name and configuration.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                last_failure_at: None,
            }),
            observer: None,
        }
    }

    /// Register a callback invoked on every state change.
    pub fn with_observer(
        mut self,
        observer: impl Fn(BreakerState, BreakerState) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Current state, applying the lazy open-to-half-open transition first.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("breaker state poisoned");
        self.refresh(&mut inner);
        inner.state
    }

    /// Run `op` through the breaker.
    ///
    /// Returns [`BreakerError::Open`] without calling `op` when the circuit
    /// is open, otherwise forwards the call's outcome and updates the state.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_pass() {
            return Err(BreakerError::Open {
                name: self.name.clone(),
            });
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Run `op` through the breaker, producing `fallback()` instead of an
    /// error when the circuit is open.
    pub async fn execute_with_fallback<T, E, F, Fut>(
        &self,
        op: F,
        fallback: impl FnOnce() -> T,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.execute(op).await {
            Ok(value) => Ok(value),
            Err(BreakerError::Open { .. }) => Ok(fallback()),
            Err(BreakerError::Inner(err)) => Err(err),
        }
    }

    /// Decide whether a call may proceed, applying the lazy transition.
    fn try_pass(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker state poisoned");
        self.refresh(&mut inner);
        inner.state != BreakerState::Open
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker state poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_attempts {
                    self.transition(&mut inner, BreakerState::Closed);
                    inner.consecutive_failures = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker state poisoned");
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open);
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit opened after consecutive failures"
                    );
                }
            }
            BreakerState::HalfOpen => {
                // One failed trial call reopens the circuit.
                self.transition(&mut inner, BreakerState::Open);
                warn!(breaker = %self.name, "trial call failed; circuit reopened");
            }
            BreakerState::Open => {}
        }
    }

    /// Lazily move open to half-open once the reset timeout has elapsed.
    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open
            && let Some(last_failure_at) = inner.last_failure_at
            && last_failure_at.elapsed() >= self.config.reset_timeout
        {
            self.transition(inner, BreakerState::HalfOpen);
            inner.half_open_successes = 0;
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        if let Some(observer) = &self.observer {
            observer(from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(reset_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: 3,
                reset_timeout,
                half_open_max_attempts: 2,
            },
        )
    }

    async fn fail(b: &CircuitBreaker) {
        let _ = b
            .execute(|| async { Err::<(), _>("boom") })
            .await;
    }

    async fn succeed(b: &CircuitBreaker) {
        b.execute(|| async { Ok::<_, &str>(()) }).await.unwrap();
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let b = breaker(Duration::from_secs(60));

        fail(&b).await;
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Closed);

        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);

        // Open circuit rejects without running the call.
        let called = Arc::new(AtomicUsize::new(0));
        let counter = called.clone();
        let result = b
            .execute(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_resets_the_failure_streak() {
        let b = breaker(Duration::from_secs(60));
        fail(&b).await;
        fail(&b).await;
        succeed(&b).await;
        fail(&b).await;
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_closes_after_enough_successes() {
        let b = breaker(Duration::ZERO);
        fail(&b).await;
        fail(&b).await;
        fail(&b).await;

        // Zero reset timeout: the next call observes half-open immediately.
        assert_eq!(b.state(), BreakerState::HalfOpen);
        succeed(&b).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);
        succeed(&b).await;
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_reopens_on_single_failure() {
        let reopened = Arc::new(AtomicUsize::new(0));
        let seen = reopened.clone();
        let b = breaker(Duration::ZERO).with_observer(move |from, to| {
            if from == BreakerState::HalfOpen && to == BreakerState::Open {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        fail(&b).await;
        fail(&b).await;
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        // The failed trial call reopens the circuit. The zero timeout flips
        // it straight back to half-open, so observe the transition itself.
        fail(&b).await;
        assert_eq!(reopened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_runs_when_open() {
        let b = breaker(Duration::from_secs(60));
        fail(&b).await;
        fail(&b).await;
        fail(&b).await;

        let value: Result<u32, &str> = b
            .execute_with_fallback(|| async { Ok(1) }, || 42)
            .await;
        assert_eq!(value.unwrap(), 42);
    }
}

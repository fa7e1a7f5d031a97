//! Circuit breaker state machine.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Operations run normally; consecutive failures are counted.
    Closed,
    /// Operations are rejected until the open timeout elapses.
    Open,
    /// A limited number of probe operations are let through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error, PartialEq)]
pub enum BreakerError<E> {
    /// The breaker rejected the operation without running it.
    #[error("circuit breaker is open")]
    Open,
    /// The operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

/// Configuration for a [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Name used in logs and state-change notifications.
    pub name: String,
    /// Consecutive failures in `Closed` before tripping to `Open`.
    pub max_failures: u32,
    /// How long `Open` lasts before admitting a half-open probe.
    pub timeout: Duration,
    /// Consecutive successes in `HalfOpen` before returning to `Closed`.
    pub half_open_max: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: "breaker".to_string(),
            max_failures: 5,
            timeout: Duration::from_secs(30),
            half_open_max: 3,
        }
    }
}

/// Point-in-time view of breaker internals.
#[derive(Debug, Clone, Copy)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure: Option<Instant>,
}

/// Listener notified of every state transition.
///
/// Arguments are (breaker name, from, to). Dispatch happens on a fresh
/// task, never under the breaker's lock, so a listener cannot re-enter or
/// deadlock the breaker. Attaching a listener therefore requires a Tokio
/// runtime at transition time.
pub type StateListener = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
}

/// A three-state circuit breaker guarding a fallible operation.
pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    timeout: Duration,
    half_open_max: u32,
    inner: Mutex<Inner>,
    listener: Option<StateListener>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            name: config.name,
            max_failures: config.max_failures,
            timeout: config.timeout,
            half_open_max: config.half_open_max,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
            }),
            listener: None,
        }
    }

    /// Attach a state-change listener.
    pub fn with_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Run the protected operation through the breaker.
    ///
    /// The breaker's lock is held only across admission and outcome
    /// recording, never across the operation itself.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(BreakerError::Open);
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Admission check. `Open` flips to `HalfOpen` once the timeout elapsed.
    pub fn try_acquire(&self) -> bool {
        let transition;
        let admitted;
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => {
                    transition = None;
                    admitted = true;
                }
                CircuitState::Open => {
                    let expired = inner
                        .last_failure
                        .is_some_and(|at| at.elapsed() >= self.timeout);
                    if expired {
                        transition = Some(self.transition(&mut inner, CircuitState::HalfOpen));
                        admitted = true;
                    } else {
                        transition = None;
                        admitted = false;
                    }
                }
            }
        }
        self.notify(transition);
        admitted
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        let transition;
        {
            let mut inner = self.inner.lock().unwrap();
            transition = match inner.state {
                CircuitState::Closed => {
                    inner.failures = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.successes += 1;
                    if inner.successes >= self.half_open_max {
                        Some(self.transition(&mut inner, CircuitState::Closed))
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            };
        }
        self.notify(transition);
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        let transition;
        {
            let mut inner = self.inner.lock().unwrap();
            inner.last_failure = Some(Instant::now());
            transition = match inner.state {
                CircuitState::Closed => {
                    inner.failures += 1;
                    if inner.failures >= self.max_failures {
                        Some(self.transition(&mut inner, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => Some(self.transition(&mut inner, CircuitState::Open)),
                CircuitState::Open => None,
            };
        }
        self.notify(transition);
    }

    /// Current state without side effects.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Force the breaker back to `Closed` with cleared counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.successes = 0;
    }

    /// Snapshot of state, failure count, and last failure time.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock().unwrap();
        BreakerStats {
            state: inner.state,
            failures: inner.failures,
            last_failure: inner.last_failure,
        }
    }

    /// Apply a state transition while holding the lock; counters reset on
    /// every transition. Returns (from, to) for post-lock notification.
    fn transition(&self, inner: &mut Inner, to: CircuitState) -> (CircuitState, CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.failures = 0;
        inner.successes = 0;
        (from, to)
    }

    fn notify(&self, transition: Option<(CircuitState, CircuitState)>) {
        if let Some((from, to)) = transition {
            if to == CircuitState::Open {
                warn!(name = %self.name, %from, %to, "circuit breaker opened");
            } else {
                debug!(name = %self.name, %from, %to, "circuit breaker state changed");
            }
            if let Some(ref listener) = self.listener {
                let listener = Arc::clone(listener);
                let name = self.name.clone();
                tokio::spawn(async move {
                    listener(&name, from, to);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(max_failures: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            name: "test".to_string(),
            max_failures,
            timeout,
            half_open_max: 3,
        })
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.execute(|| async { Err::<(), _>("boom") }).await.map(|_| ())
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.execute(|| async { Ok::<_, &'static str>(()) }).await
    }

    #[tokio::test]
    async fn starts_closed_and_allows() {
        let cb = breaker(3, Duration::from_secs(30));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(succeed(&cb).await.is_ok());
    }

    #[tokio::test]
    async fn opens_after_max_failures() {
        let cb = breaker(3, Duration::from_secs(30));

        for _ in 0..2 {
            assert_eq!(fail(&cb).await, Err(BreakerError::Inner("boom")));
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert_eq!(fail(&cb).await, Err(BreakerError::Inner("boom")));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn rejects_while_open() {
        let cb = breaker(1, Duration::from_secs(30));
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        // Operation never runs; the error is Open, not Inner.
        assert_eq!(succeed(&cb).await, Err(BreakerError::Open));
    }

    #[tokio::test]
    async fn half_opens_after_timeout() {
        let cb = breaker(1, Duration::from_millis(20));
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        // First admission after the timeout goes through as a probe.
        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn closes_after_half_open_successes() {
        let cb = breaker(1, Duration::from_millis(20));
        let _ = fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        for _ in 0..3 {
            assert!(succeed(&cb).await.is_ok());
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failures, 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(20));
        let _ = fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(succeed(&cb).await, Err(BreakerError::Open));
    }

    #[tokio::test]
    async fn success_resets_failure_count_in_closed() {
        let cb = breaker(3, Duration::from_secs(30));

        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.stats().failures, 2);

        let _ = succeed(&cb).await;
        assert_eq!(cb.stats().failures, 0);

        // Two more failures are not enough to open anymore.
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn reset_closes_and_clears() {
        let cb = breaker(1, Duration::from_secs(30));
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(succeed(&cb).await.is_ok());
    }

    /// Listener dispatch runs on a spawned task; poll until it lands.
    async fn wait_for_count(counter: &AtomicU32, expected: u32) {
        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!(
            "listener count never reached {expected}, got {}",
            counter.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn listener_fires_on_transitions() {
        let transitions = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&transitions);
        let cb = CircuitBreaker::new(BreakerConfig {
            name: "listener".to_string(),
            max_failures: 1,
            timeout: Duration::from_millis(20),
            half_open_max: 1,
        })
        .with_listener(Arc::new(move |_, _, to| {
            if to == CircuitState::Open {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let _ = fail(&cb).await;
        wait_for_count(&transitions, 1).await;

        // Recover, then trip again.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = succeed(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        let _ = fail(&cb).await;
        wait_for_count(&transitions, 2).await;
    }

    #[tokio::test]
    async fn successful_result_passes_through() {
        let cb = breaker(3, Duration::from_secs(30));
        let value = cb
            .execute(|| async { Ok::<_, &'static str>(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }
}

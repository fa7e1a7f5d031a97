//! Resilient collector — retries plus a circuit breaker around a raw
//! collector.
//!
//! One whole retry sequence runs inside a single breaker admission, so a
//! cluster whose source is down costs the breaker one failure per cycle,
//! not one per attempt.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use fleet_resilience::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState, StateListener};
use fleet_state::ClusterMetrics;

use crate::{Collector, CollectorError};

/// Configuration for [`ResilientCollector`].
#[derive(Debug, Clone)]
pub struct ResilientConfig {
    /// Consecutive failed sequences before the breaker opens.
    pub max_failures: u32,
    /// How long the breaker stays open before probing.
    pub breaker_timeout: Duration,
    /// Attempts per collect call.
    pub retry_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for ResilientConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            breaker_timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Wraps a collector with retry attempts and a circuit breaker.
pub struct ResilientCollector {
    inner: Arc<dyn Collector>,
    breaker: CircuitBreaker,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl ResilientCollector {
    pub fn new(inner: Arc<dyn Collector>, config: ResilientConfig) -> Self {
        let breaker = CircuitBreaker::new(BreakerConfig {
            name: "collector".to_string(),
            max_failures: config.max_failures,
            timeout: config.breaker_timeout,
            ..BreakerConfig::default()
        });
        Self {
            inner,
            breaker,
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: config.retry_delay,
        }
    }

    /// Attach a breaker state-change listener (e.g. to publish an alert
    /// when the circuit opens).
    pub fn with_breaker_listener(mut self, listener: StateListener) -> Self {
        self.breaker = self.breaker.with_listener(listener);
        self
    }

    /// Current breaker state.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Force the breaker closed.
    pub fn reset_circuit(&self) {
        self.breaker.reset();
    }
}

#[async_trait::async_trait]
impl Collector for ResilientCollector {
    async fn collect(&self, cluster_id: &str) -> Result<ClusterMetrics, CollectorError> {
        let result = self
            .breaker
            .execute(|| async {
                let mut last_err = None;
                for attempt in 1..=self.retry_attempts {
                    match self.inner.collect(cluster_id).await {
                        Ok(metrics) => return Ok(metrics),
                        Err(e) => {
                            warn!(
                                %cluster_id,
                                attempt,
                                attempts = self.retry_attempts,
                                error = %e,
                                "collection attempt failed"
                            );
                            last_err = Some(e);
                        }
                    }
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                Err(last_err
                    .unwrap_or_else(|| CollectorError::Collection("no attempts made".to_string())))
            })
            .await;

        match result {
            Ok(metrics) => Ok(metrics),
            Err(BreakerError::Open) => Err(CollectorError::CircuitOpen),
            Err(BreakerError::Inner(e)) => Err(e),
        }
    }

    async fn health_check(&self) -> Result<(), CollectorError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;

    /// Collector that fails the first `failures` calls, then succeeds.
    struct FlakyCollector {
        remaining_failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyCollector {
        fn new(failures: u32) -> Self {
            Self {
                remaining_failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Collector for FlakyCollector {
        async fn collect(&self, cluster_id: &str) -> Result<ClusterMetrics, CollectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(CollectorError::Collection("flaky".to_string()));
            }
            Ok(ClusterMetrics {
                cluster_id: cluster_id.to_string(),
                timestamp: Utc::now(),
                servers: Vec::new(),
            })
        }

        async fn health_check(&self) -> Result<(), CollectorError> {
            Ok(())
        }
    }

    fn fast_config() -> ResilientConfig {
        ResilientConfig {
            max_failures: 3,
            breaker_timeout: Duration::from_millis(50),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let flaky = Arc::new(FlakyCollector::new(2));
        let collector = ResilientCollector::new(Arc::clone(&flaky) as Arc<dyn Collector>, fast_config());

        let metrics = collector.collect("c-1").await.unwrap();
        assert_eq!(metrics.cluster_id, "c-1");
        // 2 failures + 1 success, within one breaker admission.
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(collector.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_last_error() {
        let flaky = Arc::new(FlakyCollector::new(10));
        let collector = ResilientCollector::new(flaky as Arc<dyn Collector>, fast_config());

        let err = collector.collect("c-1").await.unwrap_err();
        assert!(matches!(err, CollectorError::Collection(_)));
    }

    #[tokio::test]
    async fn breaker_opens_after_failed_sequences() {
        let flaky = Arc::new(FlakyCollector::new(u32::MAX));
        let collector = ResilientCollector::new(Arc::clone(&flaky) as Arc<dyn Collector>, fast_config());

        // Three failed sequences trip the breaker (max_failures = 3).
        for _ in 0..3 {
            let err = collector.collect("c-1").await.unwrap_err();
            assert!(matches!(err, CollectorError::Collection(_)));
        }
        assert_eq!(collector.circuit_state(), CircuitState::Open);

        // While open, no attempts reach the inner collector.
        let calls_before = flaky.calls.load(Ordering::SeqCst);
        let err = collector.collect("c-1").await.unwrap_err();
        assert!(matches!(err, CollectorError::CircuitOpen));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn breaker_recovers_through_half_open() {
        let flaky = Arc::new(FlakyCollector::new(9));
        let collector = ResilientCollector::new(flaky as Arc<dyn Collector>, fast_config());

        // 9 failures = 3 failed sequences of 3 attempts → breaker opens.
        for _ in 0..3 {
            let _ = collector.collect("c-1").await;
        }
        assert_eq!(collector.circuit_state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;

        // Half-open probe succeeds immediately (failures are exhausted);
        // two more successes close the breaker.
        for _ in 0..3 {
            assert!(collector.collect("c-1").await.is_ok());
        }
        assert_eq!(collector.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn reset_closes_the_circuit() {
        let flaky = Arc::new(FlakyCollector::new(u32::MAX));
        let collector = ResilientCollector::new(flaky as Arc<dyn Collector>, fast_config());

        for _ in 0..3 {
            let _ = collector.collect("c-1").await;
        }
        assert_eq!(collector.circuit_state(), CircuitState::Open);

        collector.reset_circuit();
        assert_eq!(collector.circuit_state(), CircuitState::Closed);
    }
}

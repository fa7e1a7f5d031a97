//! Mock collector — synthesizes telemetry around a configurable baseline.
//!
//! Used by the sim mode of the daemon and by tests. Supports failure
//! injection so resilience paths (retries, circuit breaker) can be driven
//! deterministically.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use rand::Rng;

use fleet_state::{ClusterMetrics, ServerMetric, new_id};

use crate::{Collector, CollectorError};

/// Baseline configuration for synthesized samples.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Mean CPU percentage.
    pub base_cpu: f64,
    /// Mean memory percentage.
    pub base_memory: f64,
    /// Uniform jitter applied around each baseline.
    pub variance: f64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            base_cpu: 50.0,
            base_memory: 60.0,
            variance: 10.0,
        }
    }
}

struct MockState {
    clusters: HashMap<String, usize>,
    base_cpu: f64,
    base_memory: f64,
    variance: f64,
    failing: bool,
}

/// Collector producing synthetic metrics for registered clusters.
pub struct MockCollector {
    state: Mutex<MockState>,
}

impl MockCollector {
    pub fn new(config: MockConfig) -> Self {
        Self {
            state: Mutex::new(MockState {
                clusters: HashMap::new(),
                base_cpu: config.base_cpu,
                base_memory: config.base_memory,
                variance: config.variance,
                failing: false,
            }),
        }
    }

    /// Register a cluster and the number of servers it reports.
    pub fn set_cluster_servers(&self, cluster_id: &str, server_count: usize) {
        let mut state = self.state.lock().unwrap();
        state.clusters.insert(cluster_id.to_string(), server_count);
    }

    /// Move the CPU baseline (e.g. to simulate a load spike).
    pub fn set_base_cpu(&self, cpu: f64) {
        self.state.lock().unwrap().base_cpu = cpu;
    }

    /// Toggle failure injection. While failing, every collect errors.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    fn jittered(base: f64, variance: f64) -> f64 {
        let mut rng = rand::thread_rng();
        let value = base + rng.gen_range(-1.0..1.0) * variance;
        value.clamp(0.0, 100.0)
    }
}

#[async_trait::async_trait]
impl Collector for MockCollector {
    async fn collect(&self, cluster_id: &str) -> Result<ClusterMetrics, CollectorError> {
        let (server_count, base_cpu, base_memory, variance) = {
            let state = self.state.lock().unwrap();
            if state.failing {
                return Err(CollectorError::Collection("injected failure".to_string()));
            }
            let count = *state
                .clusters
                .get(cluster_id)
                .ok_or_else(|| CollectorError::ClusterNotFound(cluster_id.to_string()))?;
            (count, state.base_cpu, state.base_memory, state.variance)
        };

        let servers = (0..server_count)
            .map(|_| ServerMetric {
                server_id: new_id(),
                cpu_usage: Self::jittered(base_cpu, variance),
                memory_usage: Self::jittered(base_memory, variance),
                request_load: Self::jittered(100.0, 50.0) as u64,
            })
            .collect();

        Ok(ClusterMetrics {
            cluster_id: cluster_id.to_string(),
            timestamp: Utc::now(),
            servers,
        })
    }

    async fn health_check(&self) -> Result<(), CollectorError> {
        if self.state.lock().unwrap().failing {
            return Err(CollectorError::Collection("injected failure".to_string()));
        }
        Ok(())
    }
}

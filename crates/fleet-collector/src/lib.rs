//! fleet-collector — telemetry collection for Fleetscale.
//!
//! The `Collector` trait is the I/O edge of a pipeline: fetch one cluster's
//! utilization sample, or fail. Three implementations:
//!
//! - [`HttpCollector`] — GETs `{endpoint}/{cluster_id}` from the telemetry
//!   source and parses the JSON response.
//! - [`MockCollector`] — synthesizes samples around a configurable baseline;
//!   supports failure injection for tests and the sim mode.
//! - [`ResilientCollector`] — wraps any collector with fixed-delay retries,
//!   the whole retry sequence running inside one circuit-breaker admission.
//!
//! Cancellation: callers bound a collect with `tokio::time::timeout`;
//! dropping the future aborts an in-flight attempt and any retry sleep.

pub mod http;
pub mod mock;
pub mod resilient;

use async_trait::async_trait;
use thiserror::Error;

use fleet_state::ClusterMetrics;

pub use http::HttpCollector;
pub use mock::{MockCollector, MockConfig};
pub use resilient::{ResilientCollector, ResilientConfig};

/// Errors a collector can report.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("metric collection failed: {0}")]
    Collection(String),

    #[error("collection timed out")]
    Timeout,

    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("invalid response from telemetry source: {0}")]
    InvalidResponse(String),

    #[error("circuit breaker is open")]
    CircuitOpen,
}

/// Fetches utilization telemetry for a cluster.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Fetch the current metrics sample for a cluster.
    async fn collect(&self, cluster_id: &str) -> Result<ClusterMetrics, CollectorError>;

    /// Verify the collector can reach its data source.
    async fn health_check(&self) -> Result<(), CollectorError>;
}

//! fleet-scaler — executes scaling decisions against a provisioner.
//!
//! The [`Scaler`] trait is the execution edge of a pipeline. The crate
//! ships a [`ServerRegistry`] (the core's view of server lifecycle state)
//! and a [`SimScaler`] that simulates a provisioner: added servers appear
//! in `Provisioning` and activate after a bounded provision time; removed
//! servers drain, then terminate.
//!
//! Server lifecycle changes are published to the event bus
//! (`server_added` / `server_removed` / `server_activated`) rather than
//! delivered through callbacks; dispatch happens on fresh tasks so a slow
//! bus never stalls a scale operation.

pub mod registry;
pub mod sim;

use async_trait::async_trait;
use thiserror::Error;

use fleet_state::{ClusterState, Server, ServerId};

pub use registry::ServerRegistry;
pub use sim::{SimScaler, SimScalerConfig};

/// Errors a scaler can report.
#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("scaling operation failed: {0}")]
    ScalingFailed(String),

    #[error("invalid target server count: {0}")]
    InvalidTarget(u32),

    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("invalid server state transition: {0} -> {1}")]
    InvalidTransition(String, String),
}

/// Result of one scale operation.
#[derive(Debug, Clone, Default)]
pub struct ScaleOutcome {
    pub cluster_id: String,
    pub success: bool,
    pub servers_added: Vec<ServerId>,
    pub servers_removed: Vec<ServerId>,
    /// Fewer servers than requested could be acted on.
    pub partial: bool,
}

/// Applies scaling decisions and reports cluster server state.
#[async_trait]
pub trait Scaler: Send + Sync {
    /// Add `count` servers to a cluster. `count == 0` is an invalid target.
    async fn scale_up(&self, cluster_id: &str, count: u32) -> Result<ScaleOutcome, ScalerError>;

    /// Remove `count` servers from a cluster. Removing more than the
    /// active count drains what is there and reports partial success.
    async fn scale_down(&self, cluster_id: &str, count: u32) -> Result<ScaleOutcome, ScalerError>;

    /// Snapshot of the cluster's server counts by lifecycle phase.
    async fn cluster_state(&self, cluster_id: &str) -> Result<ClusterState, ScalerError>;

    /// Look up a single server.
    async fn server(&self, server_id: &str) -> Result<Server, ScalerError>;
}

//! Simulated scaler — stands in for the external provisioner.
//!
//! Added servers appear in `Provisioning` immediately and activate after
//! `provision_time`. Removed servers start `Draining` immediately and
//! terminate after a third of `drain_timeout`. Each transition runs on its
//! own task so scale calls return without waiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use fleet_state::{ClusterState, Server, ServerState};

use crate::{ScaleOutcome, Scaler, ScalerError, ServerRegistry};

/// Timing of the simulated provisioner.
#[derive(Debug, Clone)]
pub struct SimScalerConfig {
    /// Delay before an added server becomes active.
    pub provision_time: Duration,
    /// Drain budget; termination fires after a third of it.
    pub drain_timeout: Duration,
}

impl Default for SimScalerConfig {
    fn default() -> Self {
        Self {
            provision_time: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Scaler that simulates provisioning against a shared registry.
pub struct SimScaler {
    registry: Arc<ServerRegistry>,
    config: SimScalerConfig,
}

impl SimScaler {
    pub fn new(registry: Arc<ServerRegistry>, config: SimScalerConfig) -> Self {
        Self { registry, config }
    }

    /// Seed a cluster with already-active servers.
    pub fn initialize_cluster(&self, cluster_id: &str, server_count: u32) {
        for _ in 0..server_count {
            let mut server = Server::new(cluster_id);
            server.activate();
            self.registry.add(server);
        }
        info!(%cluster_id, server_count, "cluster initialized with active servers");
    }

    /// The registry backing this scaler.
    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    fn spawn_provisioning(&self, server_id: String) {
        let registry = Arc::clone(&self.registry);
        let provision_time = self.config.provision_time;
        tokio::spawn(async move {
            tokio::time::sleep(provision_time).await;
            if let Err(e) = registry.update_state(&server_id, ServerState::Active) {
                error!(%server_id, error = %e, "failed to activate server");
            }
        });
    }

    fn spawn_termination(&self, server_id: String) {
        let registry = Arc::clone(&self.registry);
        let drain = self.config.drain_timeout / 3;
        tokio::spawn(async move {
            tokio::time::sleep(drain).await;
            if let Err(e) = registry.update_state(&server_id, ServerState::Terminated) {
                error!(%server_id, error = %e, "failed to terminate server");
            }
        });
    }
}

#[async_trait]
impl Scaler for SimScaler {
    async fn scale_up(&self, cluster_id: &str, count: u32) -> Result<ScaleOutcome, ScalerError> {
        if count == 0 {
            return Err(ScalerError::InvalidTarget(count));
        }

        let mut outcome = ScaleOutcome {
            cluster_id: cluster_id.to_string(),
            ..ScaleOutcome::default()
        };

        info!(%cluster_id, count, "scaling up");
        for _ in 0..count {
            let server = Server::new(cluster_id);
            let server_id = server.id.clone();
            self.registry.add(server);
            self.spawn_provisioning(server_id.clone());
            outcome.servers_added.push(server_id);
        }

        outcome.success = true;
        Ok(outcome)
    }

    async fn scale_down(&self, cluster_id: &str, count: u32) -> Result<ScaleOutcome, ScalerError> {
        if count == 0 {
            return Err(ScalerError::InvalidTarget(count));
        }

        let active = self.registry.active_servers(cluster_id);
        if active.is_empty() {
            return Err(ScalerError::ClusterNotFound(cluster_id.to_string()));
        }

        let mut outcome = ScaleOutcome {
            cluster_id: cluster_id.to_string(),
            ..ScaleOutcome::default()
        };
        let to_remove = (count as usize).min(active.len());
        outcome.partial = (count as usize) > active.len();

        info!(%cluster_id, removing = to_remove, requested = count, "scaling down");
        for server in active.iter().take(to_remove) {
            self.registry
                .update_state(&server.id, ServerState::Draining)?;
            self.spawn_termination(server.id.clone());
            outcome.servers_removed.push(server.id.clone());
        }

        outcome.success = true;
        Ok(outcome)
    }

    async fn cluster_state(&self, cluster_id: &str) -> Result<ClusterState, ScalerError> {
        Ok(self.registry.cluster_state(cluster_id))
    }

    async fn server(&self, server_id: &str) -> Result<Server, ScalerError> {
        self.registry
            .server(server_id)
            .ok_or_else(|| ScalerError::ServerNotFound(server_id.to_string()))
    }
}

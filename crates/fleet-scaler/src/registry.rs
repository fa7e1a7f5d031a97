//! Server registry — the core's view of server lifecycle state.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{info, warn};

use fleet_events::EventPublisher;
use fleet_state::{ClusterState, Server, ServerState};

use crate::ScalerError;

#[derive(Default)]
struct RegistryInner {
    servers: HashMap<String, Server>,
    /// cluster_id → server ids, insertion order.
    clusters: HashMap<String, Vec<String>>,
}

/// Tracks every server the scaler manages.
///
/// All reads return copies; the lock is never held across I/O. Lifecycle
/// events are dispatched on fresh tasks, so publishing a slow bus can
/// never stall a scale operation — attaching a publisher requires a Tokio
/// runtime at mutation time.
pub struct ServerRegistry {
    inner: RwLock<RegistryInner>,
    events: Option<EventPublisher>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            events: None,
        }
    }

    /// Publish lifecycle events (`server_added` etc.) onto the bus.
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Register a new server.
    pub fn add(&self, server: Server) {
        {
            let mut inner = self.inner.write().unwrap();
            inner
                .clusters
                .entry(server.cluster_id.clone())
                .or_default()
                .push(server.id.clone());
            inner.servers.insert(server.id.clone(), server.clone());
        }

        info!(
            cluster_id = %server.cluster_id,
            server_id = %server.id,
            state = ?server.state,
            "server added"
        );
        if let Some(ref events) = self.events {
            let events = events.clone();
            tokio::spawn(async move {
                events.server_added(&server);
            });
        }
    }

    /// Advance a server's lifecycle state.
    ///
    /// Backward transitions are rejected; the lifecycle is monotonic.
    pub fn update_state(&self, server_id: &str, new_state: ServerState) -> Result<(), ScalerError> {
        let (updated, old_state) = {
            let mut inner = self.inner.write().unwrap();
            let server = inner
                .servers
                .get_mut(server_id)
                .ok_or_else(|| ScalerError::ServerNotFound(server_id.to_string()))?;

            let old_state = server.state;
            if !old_state.can_transition_to(new_state) {
                warn!(
                    %server_id,
                    from = ?old_state,
                    to = ?new_state,
                    "rejected backward server state transition"
                );
                return Err(ScalerError::InvalidTransition(
                    format!("{old_state:?}"),
                    format!("{new_state:?}"),
                ));
            }

            match new_state {
                ServerState::Active => server.activate(),
                ServerState::Draining => server.drain(),
                ServerState::Terminated => server.terminate(),
                ServerState::Provisioning => {}
            }
            (server.clone(), old_state)
        };

        info!(
            cluster_id = %updated.cluster_id,
            %server_id,
            from = ?old_state,
            to = ?new_state,
            "server state changed"
        );
        if let Some(ref events) = self.events {
            let events = events.clone();
            tokio::spawn(async move {
                match new_state {
                    ServerState::Active => events.server_activated(&updated),
                    ServerState::Terminated => events.server_removed(&updated),
                    _ => {}
                }
            });
        }
        Ok(())
    }

    /// Look up a server by id.
    pub fn server(&self, server_id: &str) -> Option<Server> {
        let inner = self.inner.read().unwrap();
        inner.servers.get(server_id).cloned()
    }

    /// Every server of a cluster, including terminated ones.
    pub fn cluster_servers(&self, cluster_id: &str) -> Vec<Server> {
        let inner = self.inner.read().unwrap();
        inner
            .clusters
            .get(cluster_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.servers.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Active servers of a cluster, oldest first.
    pub fn active_servers(&self, cluster_id: &str) -> Vec<Server> {
        let inner = self.inner.read().unwrap();
        inner
            .clusters
            .get(cluster_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.servers.get(id))
                    .filter(|s| s.is_active())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of the cluster's counts. Terminated servers never count.
    pub fn cluster_state(&self, cluster_id: &str) -> ClusterState {
        let inner = self.inner.read().unwrap();
        let mut state = ClusterState {
            cluster_id: cluster_id.to_string(),
            ..ClusterState::default()
        };

        let Some(ids) = inner.clusters.get(cluster_id) else {
            return state;
        };
        for id in ids {
            let Some(server) = inner.servers.get(id) else {
                continue;
            };
            match server.state {
                ServerState::Provisioning => {
                    state.provisioning_count += 1;
                    state.total_servers += 1;
                }
                ServerState::Active => {
                    state.active_servers += 1;
                    state.total_servers += 1;
                }
                ServerState::Draining => {
                    state.draining_count += 1;
                    state.total_servers += 1;
                }
                ServerState::Terminated => {}
            }
        }
        state
    }

    /// Drop terminated servers from the registry. Returns how many.
    pub fn cleanup_terminated(&self, cluster_id: &str) -> usize {
        let mut inner = self.inner.write().unwrap();
        let Some(ids) = inner.clusters.get(cluster_id).cloned() else {
            return 0;
        };

        let mut kept = Vec::with_capacity(ids.len());
        let mut removed = 0;
        for id in ids {
            let terminated = inner
                .servers
                .get(&id)
                .is_some_and(|s| s.state == ServerState::Terminated);
            if terminated {
                inner.servers.remove(&id);
                removed += 1;
            } else {
                kept.push(id);
            }
        }
        inner.clusters.insert(cluster_id.to_string(), kept);
        removed
    }
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

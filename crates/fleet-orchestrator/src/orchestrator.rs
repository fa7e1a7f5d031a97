//! Orchestrator — creates, starts, and drains per-cluster pipelines.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::{RwLock, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

use fleet_analyzer::{Analyzer, AnalyzerConfig, SustainedTracker};
use fleet_collector::{Collector, ResilientCollector, ResilientConfig};
use fleet_decision::{DecisionConfig, DecisionEngine};
use fleet_events::{EventBus, EventPersister, EventPublisher};
use fleet_resilience::CircuitState;
use fleet_scaler::Scaler;
use fleet_state::{Cluster, Event, EventSeverity, EventType, StateStore};

use crate::{OrchestratorError, Pipeline, PipelineConfig};

/// Shared configuration applied to every pipeline.
///
/// Per-cluster `min_servers`/`max_servers` come from the [`Cluster`]
/// record at pipeline-start time and override the decision defaults.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Tick period of every pipeline.
    pub collect_interval: Duration,
    /// Retry and circuit-breaker settings for wrapped collectors.
    pub resilient: ResilientConfig,
    pub analyzer: AnalyzerConfig,
    pub decision: DecisionConfig,
    /// Per-subscriber event channel capacity.
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            collect_interval: Duration::from_secs(10),
            resilient: ResilientConfig::default(),
            analyzer: AnalyzerConfig::default(),
            decision: DecisionConfig::default(),
            event_buffer: 100,
        }
    }
}

/// Owns the event bus, the event persister, and the pipeline map.
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: StateStore,
    bus: Arc<EventBus>,
    pipelines: RwLock<HashMap<String, Pipeline>>,
    persister_shutdown: watch::Sender<bool>,
    persister_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, store: StateStore) -> Self {
        let bus = Arc::new(EventBus::new(config.event_buffer));
        let (persister_shutdown, _) = watch::channel(false);
        Self {
            config,
            store,
            bus,
            pipelines: RwLock::new(HashMap::new()),
            persister_shutdown,
            persister_handle: Mutex::new(None),
        }
    }

    /// Start the event persister. Idempotent.
    pub fn start(&self) {
        let mut slot = self.persister_handle.lock().unwrap();
        if slot.is_some() {
            return;
        }

        info!("orchestrator starting");
        let events = self.bus.subscribe_all();
        let shutdown = self.persister_shutdown.subscribe();
        let persister = EventPersister::new(self.store.clone());
        *slot = Some(tokio::spawn(persister.run(events, shutdown)));
    }

    /// Create and start a pipeline for a cluster.
    ///
    /// The raw collector is wrapped in a resilient collector using the
    /// orchestrator's breaker settings; a breaker-open transition raises a
    /// warning alert on the bus.
    pub async fn start_cluster(
        &self,
        cluster: &Cluster,
        collector: Arc<dyn Collector>,
        scaler: Arc<dyn Scaler>,
    ) -> Result<(), OrchestratorError> {
        let mut pipelines = self.pipelines.write().await;
        if pipelines.contains_key(&cluster.id) {
            return Err(OrchestratorError::PipelineExists(cluster.id.clone()));
        }

        let publisher = EventPublisher::new(Arc::clone(&self.bus));

        let alert_publisher = publisher.clone();
        let alert_cluster = cluster.id.clone();
        let resilient = ResilientCollector::new(collector, self.config.resilient.clone())
            .with_breaker_listener(Arc::new(move |name, from, to| {
                warn!(
                    cluster_id = %alert_cluster,
                    breaker = %name,
                    %from,
                    %to,
                    "circuit breaker state changed"
                );
                if to == CircuitState::Open {
                    alert_publisher.alert(
                        &alert_cluster,
                        EventSeverity::Warning,
                        "circuit breaker opened for collector",
                        json!({"breaker": name, "from": from.to_string(), "to": to.to_string()}),
                    );
                }
            }));

        // The cluster record's bounds are observed here, at pipeline-start;
        // a changed record takes effect on cluster restart.
        let mut decision_config = self.config.decision.clone();
        decision_config.min_servers = cluster.min_servers;
        decision_config.max_servers = cluster.max_servers;

        let pipeline = Pipeline::start(PipelineConfig {
            cluster_id: cluster.id.clone(),
            collect_interval: self.config.collect_interval,
            collector: Arc::new(resilient),
            analyzer: Arc::new(Analyzer::new(self.config.analyzer.clone())),
            analyzer_config: self.config.analyzer.clone(),
            tracker: Arc::new(SustainedTracker::new()),
            engine: Arc::new(DecisionEngine::new(decision_config)),
            scaler,
            publisher,
        });

        pipelines.insert(cluster.id.clone(), pipeline);
        info!(cluster_id = %cluster.id, name = %cluster.name, "cluster pipeline started");
        Ok(())
    }

    /// Stop a cluster's pipeline and remove it.
    pub async fn stop_cluster(&self, cluster_id: &str) -> Result<(), OrchestratorError> {
        let pipeline = {
            let mut pipelines = self.pipelines.write().await;
            pipelines
                .remove(cluster_id)
                .ok_or_else(|| OrchestratorError::PipelineNotFound(cluster_id.to_string()))?
        };

        pipeline.stop().await;
        info!(%cluster_id, "cluster pipeline stopped");
        Ok(())
    }

    /// Stop everything: drain pipelines concurrently within `drain_budget`,
    /// then stop the persister and close the bus. Safe to call twice.
    pub async fn stop(&self, drain_budget: Duration) {
        info!("orchestrator stopping");

        let pipelines: Vec<Pipeline> = {
            let mut map = self.pipelines.write().await;
            map.drain().map(|(_, pipeline)| pipeline).collect()
        };

        if !pipelines.is_empty() {
            let mut joins = JoinSet::new();
            for pipeline in pipelines {
                joins.spawn(pipeline.stop());
            }
            let drain = async {
                while joins.join_next().await.is_some() {}
            };
            if tokio::time::timeout(drain_budget, drain).await.is_err() {
                warn!("timeout waiting for pipelines to stop");
            }
        }

        let _ = self.persister_shutdown.send(true);
        let handle = self.persister_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.bus.close();
        info!("orchestrator stopped");
    }

    /// A publisher onto the shared bus, for collaborators that emit their
    /// own events (e.g. the scaler's server registry).
    pub fn publisher(&self) -> EventPublisher {
        EventPublisher::new(Arc::clone(&self.bus))
    }

    /// Subscribe to one event type on the shared bus.
    pub fn subscribe(&self, event_type: EventType) -> tokio::sync::mpsc::Receiver<Event> {
        self.bus.subscribe(event_type)
    }

    /// Subscribe to every event type on the shared bus.
    pub fn subscribe_all(&self) -> tokio::sync::mpsc::Receiver<Event> {
        self.bus.subscribe_all()
    }

    /// Ids of clusters whose pipelines are currently running.
    pub async fn running_clusters(&self) -> Vec<String> {
        let pipelines = self.pipelines.read().await;
        pipelines
            .values()
            .filter(|p| p.is_running())
            .map(|p| p.cluster_id().to_string())
            .collect()
    }

    pub async fn cluster_count(&self) -> usize {
        self.pipelines.read().await.len()
    }
}

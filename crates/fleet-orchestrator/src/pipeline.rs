//! Pipeline — one cluster's control loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use fleet_analyzer::{Analyzer, AnalyzerConfig, SustainedTracker};
use fleet_collector::{Collector, CollectorError};
use fleet_decision::DecisionEngine;
use fleet_events::EventPublisher;
use fleet_scaler::Scaler;
use fleet_state::{EventSeverity, ScalingAction, ScalingDecision, ScalingEvent, ScalingEventStatus};

/// Everything a pipeline needs to drive one cluster.
pub struct PipelineConfig {
    pub cluster_id: String,
    /// Tick period. The per-cycle deadline is one second shorter (when the
    /// interval allows it).
    pub collect_interval: Duration,
    pub collector: Arc<dyn Collector>,
    pub analyzer: Arc<Analyzer>,
    pub analyzer_config: AnalyzerConfig,
    pub tracker: Arc<SustainedTracker>,
    pub engine: Arc<DecisionEngine>,
    pub scaler: Arc<dyn Scaler>,
    pub publisher: EventPublisher,
}

/// Shared context every cycle runs against.
struct CycleContext {
    cluster_id: String,
    cycle_budget: Duration,
    collector: Arc<dyn Collector>,
    analyzer: Arc<Analyzer>,
    analyzer_config: AnalyzerConfig,
    tracker: Arc<SustainedTracker>,
    engine: Arc<DecisionEngine>,
    scaler: Arc<dyn Scaler>,
    publisher: EventPublisher,
}

/// A running control loop for a single cluster.
///
/// Dropping a `Pipeline` without calling [`Pipeline::stop`] detaches the
/// loop; the orchestrator always stops pipelines explicitly.
pub struct Pipeline {
    cluster_id: String,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Pipeline {
    /// Spawn the control loop. The first cycle runs immediately.
    pub fn start(config: PipelineConfig) -> Self {
        let cluster_id = config.cluster_id.clone();
        let interval = config.collect_interval;
        // Keep a whole second of slack when the interval is long enough;
        // tests run with sub-second intervals.
        let cycle_budget = if interval > Duration::from_secs(2) {
            interval - Duration::from_secs(1)
        } else {
            interval
        };

        let ctx = Arc::new(CycleContext {
            cluster_id: config.cluster_id,
            cycle_budget,
            collector: config.collector,
            analyzer: config.analyzer,
            analyzer_config: config.analyzer_config,
            tracker: config.tracker,
            engine: config.engine,
            scaler: config.scaler,
            publisher: config.publisher,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(ctx, interval, shutdown_rx));

        info!(%cluster_id, interval_secs = interval.as_secs_f64(), "pipeline started");
        Self {
            cluster_id,
            shutdown_tx,
            handle,
        }
    }

    /// Cancel the loop and wait for the in-flight cycle to unwind.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
        info!(cluster_id = %self.cluster_id, "pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }
}

async fn run_loop(
    ctx: Arc<CycleContext>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Each cycle runs on its own task so a panic inside it
                // cannot take the loop down.
                let cycle_ctx = Arc::clone(&ctx);
                let mut cycle = tokio::spawn(async move { cycle_ctx.run_cycle().await });

                tokio::select! {
                    result = &mut cycle => {
                        if let Err(e) = result
                            && e.is_panic()
                        {
                            error!(cluster_id = %ctx.cluster_id, error = %e, "pipeline cycle panicked");
                            ctx.publisher.error(&ctx.cluster_id, "pipeline cycle panicked", &e);
                        }
                    }
                    _ = shutdown.changed() => {
                        cycle.abort();
                        let _ = cycle.await;
                        return;
                    }
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

impl CycleContext {
    async fn run_cycle(&self) {
        if tokio::time::timeout(self.cycle_budget, self.cycle())
            .await
            .is_err()
        {
            warn!(cluster_id = %self.cluster_id, "cycle deadline exceeded");
            self.publisher
                .error(&self.cluster_id, "cycle deadline exceeded", &"timeout");
        }
    }

    async fn cycle(&self) {
        // Collect.
        let metrics = match self.collector.collect(&self.cluster_id).await {
            Ok(metrics) => metrics,
            Err(CollectorError::CircuitOpen) => {
                // The open transition already raised an alert; skip quietly
                // until the breaker half-opens.
                debug!(cluster_id = %self.cluster_id, "collect skipped, circuit open");
                return;
            }
            Err(e) => {
                error!(cluster_id = %self.cluster_id, error = %e, "collection failed");
                self.publisher
                    .error(&self.cluster_id, "metric collection failed", &e);
                return;
            }
        };
        self.publisher.metric_collected(&self.cluster_id, &metrics);

        // Analyze and track sustained conditions.
        let mut analyzed = self.analyzer.analyze(&metrics);
        self.tracker
            .update(&self.cluster_id, &mut analyzed, &self.analyzer_config);
        self.publisher.metric_analyzed(&self.cluster_id, &analyzed);
        if analyzed.is_critical() {
            self.publisher.alert(
                &self.cluster_id,
                EventSeverity::Critical,
                "CPU or memory critical",
                serde_json::to_value(&analyzed).unwrap_or_default(),
            );
        }

        // Current server counts.
        let state = match self.scaler.cluster_state(&self.cluster_id).await {
            Ok(state) => state,
            Err(e) => {
                error!(cluster_id = %self.cluster_id, error = %e, "failed to get cluster state");
                self.publisher
                    .error(&self.cluster_id, "failed to get cluster state", &e);
                return;
            }
        };

        // Decide. Prediction input is wired but nothing produces one yet.
        let decision = self.engine.decide(&analyzed, None, &state);
        self.publisher.decision_made(&self.cluster_id, &decision);

        if decision.should_execute() {
            self.execute(decision).await;
        }
    }

    async fn execute(&self, decision: ScalingDecision) {
        self.publisher.scaling_started(&self.cluster_id, &decision);

        let result = match decision.action {
            ScalingAction::ScaleUp => {
                let count = decision.target_servers.saturating_sub(decision.current_servers);
                self.scaler.scale_up(&self.cluster_id, count).await
            }
            ScalingAction::ScaleDown => {
                let count = decision.current_servers.saturating_sub(decision.target_servers);
                self.scaler.scale_down(&self.cluster_id, count).await
            }
            ScalingAction::Maintain => return,
        };

        match result {
            Ok(outcome) => {
                // The pipeline is the sole cooldown writer: any accepted
                // operation (full or partial) starts the cooldown.
                self.engine.record_scaling(&self.cluster_id);

                let status = if outcome.partial {
                    ScalingEventStatus::Partial
                } else {
                    ScalingEventStatus::Success
                };
                let event = ScalingEvent::from_decision(&decision, status);
                self.publisher.scaling_complete(&self.cluster_id, &event);

                info!(
                    cluster_id = %self.cluster_id,
                    action = %decision.action,
                    from = decision.current_servers,
                    to = decision.target_servers,
                    partial = outcome.partial,
                    "scaling complete"
                );
            }
            Err(e) => {
                // No cooldown on failure so a legitimate retry isn't blocked.
                error!(cluster_id = %self.cluster_id, error = %e, "scaling failed");
                self.publisher
                    .scaling_failed(&self.cluster_id, &decision.reason, &e);
            }
        }
    }
}

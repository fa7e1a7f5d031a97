//! Decision engine — stateful scaling policy.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use fleet_state::{
    AnalyzedMetrics, ClusterState, Prediction, ScalingAction, ScalingDecision, ThresholdStatus,
    Trend,
};

/// Minimum confidence for a prediction to influence decisions.
const PREDICTION_CONFIDENCE: f64 = 0.7;

/// Policy thresholds and limits.
#[derive(Debug, Clone)]
pub struct DecisionConfig {
    /// Suppress non-emergency scale-ups for this long after a scale action.
    pub cooldown_period: Duration,
    /// Suppress scale-downs for this long after a scale action.
    pub scale_down_cooldown_period: Duration,
    /// How long CPU must hold high before sustained-high triggers.
    pub sustained_high_duration: Duration,
    /// How long CPU must hold low before sustained-low triggers.
    pub sustained_low_duration: Duration,
    /// CPU level that bypasses cooldown entirely.
    pub emergency_cpu_threshold: f64,
    pub min_servers: u32,
    pub max_servers: u32,
    /// Largest number of servers added in one scale-up.
    pub max_scale_step: u32,
    /// CPU level the scale-up delta calculation aims for.
    pub target_cpu: f64,
    pub cpu_high: f64,
    pub cpu_low: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            cooldown_period: Duration::from_secs(300),
            scale_down_cooldown_period: Duration::from_secs(300),
            sustained_high_duration: Duration::from_secs(120),
            sustained_low_duration: Duration::from_secs(600),
            emergency_cpu_threshold: 95.0,
            min_servers: 2,
            max_servers: 50,
            max_scale_step: 3,
            target_cpu: 70.0,
            cpu_high: 80.0,
            cpu_low: 30.0,
        }
    }
}

/// Stateful scaling policy.
///
/// The only mutable state is the per-cluster last-scale timestamp; the
/// pipeline writes it via [`DecisionEngine::record_scaling`] after the
/// scaler accepts an operation.
pub struct DecisionEngine {
    config: DecisionConfig,
    last_scale: RwLock<HashMap<String, Instant>>,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            config,
            last_scale: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluate the policy for one cluster. First match wins.
    pub fn decide(
        &self,
        analyzed: &AnalyzedMetrics,
        prediction: Option<&Prediction>,
        state: &ClusterState,
    ) -> ScalingDecision {
        let mut decision = ScalingDecision {
            cluster_id: analyzed.cluster_id.clone(),
            timestamp: Utc::now(),
            action: ScalingAction::Maintain,
            current_servers: state.active_servers,
            target_servers: state.active_servers,
            reason: String::new(),
            prediction_used: false,
            confidence: None,
            is_emergency: false,
            cooldown_active: false,
        };

        // Emergency override: critical CPU with capacity left bypasses
        // cooldown entirely.
        if analyzed.avg_cpu >= self.config.emergency_cpu_threshold
            && state.can_scale_up(self.config.max_servers)
        {
            return self.scale_up(
                decision,
                state,
                self.config.max_scale_step,
                "emergency_cpu_critical",
                true,
            );
        }

        // Each direction gates on its own cooldown timer, checked only
        // once a condition actually matches.
        if let Some((reason, prediction_used)) = self.should_scale_up(analyzed, prediction, state) {
            if self.in_cooldown(&analyzed.cluster_id, self.config.cooldown_period) {
                return Self::cooldown_maintain(decision);
            }
            let delta = self.scale_up_delta(analyzed, state);
            if prediction_used {
                decision.prediction_used = true;
                decision.confidence = prediction.map(|p| p.confidence);
            }
            return self.scale_up(decision, state, delta, reason, false);
        }

        if let Some(reason) = self.should_scale_down(analyzed, prediction, state) {
            if self.in_cooldown(
                &analyzed.cluster_id,
                self.config.scale_down_cooldown_period,
            ) {
                return Self::cooldown_maintain(decision);
            }
            return self.scale_down(decision, state, reason);
        }

        decision.reason = "within_normal_parameters".to_string();
        debug!(cluster_id = %analyzed.cluster_id, "decision: maintain (normal parameters)");
        decision
    }

    fn should_scale_up(
        &self,
        analyzed: &AnalyzedMetrics,
        prediction: Option<&Prediction>,
        state: &ClusterState,
    ) -> Option<(&'static str, bool)> {
        if !state.can_scale_up(self.config.max_servers) {
            return None;
        }

        if analyzed.cpu_status == ThresholdStatus::Critical {
            return Some(("cpu_critical", false));
        }

        if analyzed.has_spike {
            return Some(("spike_detected", false));
        }

        if analyzed.cpu_status == ThresholdStatus::Warning && analyzed.trend == Trend::Rising {
            if self.sustained_elapsed(analyzed.sustained_high_at, self.config.sustained_high_duration)
            {
                return Some(("sustained_high_rising", false));
            }
            return Some(("warning_rising_trend", false));
        }

        if self.sustained_elapsed(analyzed.sustained_high_at, self.config.sustained_high_duration) {
            return Some(("sustained_high_cpu", false));
        }

        if let Some(p) = prediction
            && p.is_high_confidence(PREDICTION_CONFIDENCE)
            && p.predicted_cpu >= self.config.cpu_high
        {
            return Some(("predicted_spike_proactive", true));
        }

        None
    }

    fn should_scale_down(
        &self,
        analyzed: &AnalyzedMetrics,
        prediction: Option<&Prediction>,
        state: &ClusterState,
    ) -> Option<&'static str> {
        if !state.can_scale_down(self.config.min_servers) {
            return None;
        }

        if analyzed.trend == Trend::Rising {
            return None;
        }

        // A predicted spike vetoes shedding capacity.
        if let Some(p) = prediction
            && p.is_high_confidence(PREDICTION_CONFIDENCE)
            && p.predicted_cpu >= self.config.cpu_high
        {
            return None;
        }

        if self.sustained_elapsed(analyzed.sustained_low_at, self.config.sustained_low_duration)
            && analyzed.avg_cpu < self.config.cpu_low
        {
            return Some("sustained_low_cpu");
        }

        if analyzed.avg_cpu < self.config.cpu_low && analyzed.trend == Trend::Falling {
            return Some("low_cpu_falling_trend");
        }

        None
    }

    /// Non-emergency scale-up sizing: aim active servers at `target_cpu`.
    fn scale_up_delta(&self, analyzed: &AnalyzedMetrics, state: &ClusterState) -> u32 {
        if analyzed.avg_cpu <= 0.0 || state.active_servers == 0 {
            return 1;
        }
        let active = state.active_servers as f64;
        let ideal = (active * analyzed.avg_cpu / self.config.target_cpu).ceil() as i64;
        let delta = ideal - state.active_servers as i64;
        delta.clamp(1, self.config.max_scale_step as i64) as u32
    }

    fn scale_up(
        &self,
        mut decision: ScalingDecision,
        state: &ClusterState,
        delta: u32,
        reason: &str,
        is_emergency: bool,
    ) -> ScalingDecision {
        // Cap the added count so total (including provisioning) never
        // exceeds max_servers.
        let allowed = delta.min(state.available_capacity(self.config.max_servers));
        if allowed == 0 {
            decision.reason = "at_max_capacity".to_string();
            return decision;
        }

        decision.action = ScalingAction::ScaleUp;
        decision.target_servers = state.active_servers + allowed;
        decision.reason = reason.to_string();
        decision.is_emergency = is_emergency;

        info!(
            cluster_id = %decision.cluster_id,
            from = decision.current_servers,
            to = decision.target_servers,
            %reason,
            is_emergency,
            "decision: scale up"
        );
        decision
    }

    fn scale_down(
        &self,
        mut decision: ScalingDecision,
        state: &ClusterState,
        reason: &str,
    ) -> ScalingDecision {
        // Conservative: one server per cycle.
        let target = (state.active_servers - 1).max(self.config.min_servers);
        if target == state.active_servers {
            decision.reason = "at_min_capacity".to_string();
            return decision;
        }

        decision.action = ScalingAction::ScaleDown;
        decision.target_servers = target;
        decision.reason = reason.to_string();

        info!(
            cluster_id = %decision.cluster_id,
            from = decision.current_servers,
            to = decision.target_servers,
            %reason,
            "decision: scale down"
        );
        decision
    }

    fn cooldown_maintain(mut decision: ScalingDecision) -> ScalingDecision {
        decision.cooldown_active = true;
        decision.reason = "in_cooldown".to_string();
        debug!(cluster_id = %decision.cluster_id, "decision: maintain (cooldown active)");
        decision
    }

    fn sustained_elapsed(&self, since: Option<DateTime<Utc>>, required: Duration) -> bool {
        since.is_some_and(|at| {
            (Utc::now() - at).to_std().unwrap_or_default() >= required
        })
    }

    fn in_cooldown(&self, cluster_id: &str, period: Duration) -> bool {
        let last_scale = self.last_scale.read().unwrap();
        last_scale
            .get(cluster_id)
            .is_some_and(|at| at.elapsed() < period)
    }

    /// Stamp the cluster's last scale time. Called by the pipeline after
    /// the scaler accepts an operation (including partial success).
    pub fn record_scaling(&self, cluster_id: &str) {
        let mut last_scale = self.last_scale.write().unwrap();
        last_scale.insert(cluster_id.to_string(), Instant::now());
    }

    /// Clear the cluster's cooldown.
    pub fn reset_cooldown(&self, cluster_id: &str) {
        let mut last_scale = self.last_scale.write().unwrap();
        last_scale.remove(cluster_id);
    }

    /// Time left on the scale-up cooldown. Zero when not in cooldown.
    pub fn cooldown_remaining(&self, cluster_id: &str) -> Duration {
        let last_scale = self.last_scale.read().unwrap();
        last_scale
            .get(cluster_id)
            .map(|at| self.config.cooldown_period.saturating_sub(at.elapsed()))
            .unwrap_or_default()
    }
}

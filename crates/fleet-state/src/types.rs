//! Domain types for the Fleetscale control plane.
//!
//! These types flow through the whole pipeline: raw telemetry
//! (`ClusterMetrics`) is analyzed into `AnalyzedMetrics`, which the decision
//! engine turns into a `ScalingDecision`; executed decisions are recorded as
//! `ScalingEvent`s. All types are serializable to/from JSON for storage in
//! redb tables and for event-bus payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a cluster.
pub type ClusterId = String;

/// Unique identifier for a server within a cluster.
pub type ServerId = String;

/// Generate a new random id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── Cluster ───────────────────────────────────────────────────────

/// Administrative status of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Active,
    Paused,
    Error,
}

/// A registered cluster and its scaling bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    /// Lower bound for active servers. Always at least 1.
    pub min_servers: u32,
    /// Upper bound for total (non-terminated) servers.
    pub max_servers: u32,
    pub status: ClusterStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    pub fn new(name: &str, min_servers: u32, max_servers: u32) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.to_string(),
            min_servers,
            max_servers,
            status: ClusterStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ClusterStatus::Active
    }
}

// ── Server ────────────────────────────────────────────────────────

/// Lifecycle state of a server.
///
/// Transitions are monotonic: `Provisioning → Active → Draining → Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Provisioning,
    Active,
    Draining,
    Terminated,
}

impl ServerState {
    fn rank(self) -> u8 {
        match self {
            ServerState::Provisioning => 0,
            ServerState::Active => 1,
            ServerState::Draining => 2,
            ServerState::Terminated => 3,
        }
    }

    /// Whether a transition to `next` moves forward through the lifecycle.
    pub fn can_transition_to(self, next: ServerState) -> bool {
        next.rank() > self.rank()
    }
}

/// A single server tracked by the scaler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Server {
    pub id: ServerId,
    pub cluster_id: ClusterId,
    pub state: ServerState,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
}

impl Server {
    /// Create a new server in `Provisioning` state.
    pub fn new(cluster_id: &str) -> Self {
        Self {
            id: new_id(),
            cluster_id: cluster_id.to_string(),
            state: ServerState::Provisioning,
            created_at: Utc::now(),
            activated_at: None,
            terminated_at: None,
        }
    }

    pub fn activate(&mut self) {
        self.state = ServerState::Active;
        self.activated_at = Some(Utc::now());
    }

    pub fn drain(&mut self) {
        self.state = ServerState::Draining;
    }

    pub fn terminate(&mut self) {
        self.state = ServerState::Terminated;
        self.terminated_at = Some(Utc::now());
    }

    pub fn is_active(&self) -> bool {
        self.state == ServerState::Active
    }

    /// Provisioning or active — counts toward capacity that is coming up.
    pub fn is_running(&self) -> bool {
        matches!(self.state, ServerState::Provisioning | ServerState::Active)
    }
}

/// Read-only snapshot of a cluster's server counts by lifecycle phase.
///
/// Terminated servers are excluded from every count.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterState {
    pub cluster_id: ClusterId,
    pub total_servers: u32,
    pub active_servers: u32,
    pub provisioning_count: u32,
    pub draining_count: u32,
}

impl ClusterState {
    pub fn can_scale_up(&self, max_servers: u32) -> bool {
        self.total_servers < max_servers
    }

    pub fn can_scale_down(&self, min_servers: u32) -> bool {
        self.active_servers > min_servers
    }

    pub fn available_capacity(&self, max_servers: u32) -> u32 {
        max_servers.saturating_sub(self.total_servers)
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// Utilization sample for a single server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerMetric {
    pub server_id: ServerId,
    /// CPU utilization percentage, 0–100.
    pub cpu_usage: f64,
    /// Memory utilization percentage, 0–100.
    pub memory_usage: f64,
    pub request_load: u64,
}

/// Collected telemetry for a cluster at one instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterMetrics {
    pub cluster_id: ClusterId,
    pub timestamp: DateTime<Utc>,
    pub servers: Vec<ServerMetric>,
}

/// Aggregate statistics over one `ClusterMetrics` sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedMetrics {
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub avg_load: f64,
    pub max_cpu: f64,
    pub min_cpu: f64,
    pub server_count: u32,
}

impl ClusterMetrics {
    /// Compute plain arithmetic aggregates over the server samples.
    ///
    /// Empty input yields the zero value.
    pub fn aggregates(&self) -> AggregatedMetrics {
        if self.servers.is_empty() {
            return AggregatedMetrics::default();
        }

        let mut total_cpu = 0.0;
        let mut total_memory = 0.0;
        let mut total_load = 0.0;
        let mut max_cpu = self.servers[0].cpu_usage;
        let mut min_cpu = self.servers[0].cpu_usage;

        for s in &self.servers {
            total_cpu += s.cpu_usage;
            total_memory += s.memory_usage;
            total_load += s.request_load as f64;
            max_cpu = max_cpu.max(s.cpu_usage);
            min_cpu = min_cpu.min(s.cpu_usage);
        }

        let count = self.servers.len() as f64;
        AggregatedMetrics {
            avg_cpu: total_cpu / count,
            avg_memory: total_memory / count,
            avg_load: total_load / count,
            max_cpu,
            min_cpu,
            server_count: self.servers.len() as u32,
        }
    }
}

/// One persisted metric row (per server, per sample).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    pub time: DateTime<Utc>,
    pub cluster_id: ClusterId,
    pub server_id: ServerId,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub request_load: u64,
}

// ── Analysis ──────────────────────────────────────────────────────

/// Threshold classification for a utilization value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdStatus {
    #[default]
    Normal,
    Warning,
    Critical,
}

/// Direction of the rolling CPU trend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Falling,
    #[default]
    Stable,
}

/// Analysis results for one collected sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyzedMetrics {
    pub cluster_id: ClusterId,
    pub timestamp: DateTime<Utc>,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub max_cpu: f64,
    pub min_cpu: f64,
    pub server_count: u32,
    pub cpu_status: ThresholdStatus,
    pub memory_status: ThresholdStatus,
    pub trend: Trend,
    pub has_spike: bool,
    pub spike_percent: f64,
    /// Advisory only — never consumed by the decision engine.
    pub recommendation: String,
    /// Set while avg CPU has been continuously at or above the high threshold.
    pub sustained_high_at: Option<DateTime<Utc>>,
    /// Set while avg CPU has been continuously at or below the low threshold.
    pub sustained_low_at: Option<DateTime<Utc>>,
}

impl AnalyzedMetrics {
    /// The zero analysis: no servers, normal status, stable trend.
    pub fn empty(cluster_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            timestamp,
            avg_cpu: 0.0,
            avg_memory: 0.0,
            max_cpu: 0.0,
            min_cpu: 0.0,
            server_count: 0,
            cpu_status: ThresholdStatus::Normal,
            memory_status: ThresholdStatus::Normal,
            trend: Trend::Stable,
            has_spike: false,
            spike_percent: 0.0,
            recommendation: String::new(),
            sustained_high_at: None,
            sustained_low_at: None,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.cpu_status == ThresholdStatus::Critical
            || self.memory_status == ThresholdStatus::Critical
    }

    pub fn is_warning(&self) -> bool {
        self.cpu_status == ThresholdStatus::Warning
            || self.memory_status == ThresholdStatus::Warning
    }
}

// ── Prediction ────────────────────────────────────────────────────

/// A forecast of upcoming CPU load.
///
/// Nothing in the core produces predictions yet; the decision engine
/// accepts one as an optional input and behaves correctly without it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub cluster_id: ClusterId,
    pub created_at: DateTime<Utc>,
    pub forecast_time: DateTime<Utc>,
    pub predicted_cpu: f64,
    pub actual_cpu: Option<f64>,
    /// 0.0–1.0.
    pub confidence: f64,
    pub model_version: Option<String>,
}

impl Prediction {
    pub fn is_high_confidence(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

// ── Decision ──────────────────────────────────────────────────────

/// The action a scaling decision calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    Maintain,
}

impl std::fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalingAction::ScaleUp => write!(f, "scale_up"),
            ScalingAction::ScaleDown => write!(f, "scale_down"),
            ScalingAction::Maintain => write!(f, "maintain"),
        }
    }
}

/// A scaling decision produced by the decision engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingDecision {
    pub cluster_id: ClusterId,
    pub timestamp: DateTime<Utc>,
    pub action: ScalingAction,
    pub current_servers: u32,
    pub target_servers: u32,
    pub reason: String,
    pub prediction_used: bool,
    pub confidence: Option<f64>,
    pub is_emergency: bool,
    pub cooldown_active: bool,
}

impl ScalingDecision {
    pub fn server_delta(&self) -> i64 {
        self.target_servers as i64 - self.current_servers as i64
    }

    pub fn should_execute(&self) -> bool {
        self.action != ScalingAction::Maintain && !self.cooldown_active
    }
}

// ── Scaling events ────────────────────────────────────────────────

/// Outcome of an executed scaling operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingEventStatus {
    Success,
    Failed,
    Partial,
}

/// Persisted record of an executed scaling decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingEvent {
    pub id: String,
    pub cluster_id: ClusterId,
    pub timestamp: DateTime<Utc>,
    pub action: ScalingAction,
    pub servers_before: u32,
    pub servers_after: u32,
    pub trigger_reason: String,
    pub prediction_used: bool,
    pub confidence: Option<f64>,
    pub status: ScalingEventStatus,
}

impl ScalingEvent {
    /// Materialize an executed decision into a persistable event.
    pub fn from_decision(decision: &ScalingDecision, status: ScalingEventStatus) -> Self {
        Self {
            id: new_id(),
            cluster_id: decision.cluster_id.clone(),
            timestamp: decision.timestamp,
            action: decision.action,
            servers_before: decision.current_servers,
            servers_after: decision.target_servers,
            trigger_reason: decision.reason.clone(),
            prediction_used: decision.prediction_used,
            confidence: decision.confidence,
            status,
        }
    }
}

// ── Events ────────────────────────────────────────────────────────

/// Pipeline lifecycle phases the event bus fans out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MetricCollected,
    MetricAnalyzed,
    DecisionMade,
    ScalingStarted,
    ScalingComplete,
    ScalingFailed,
    ServerAdded,
    ServerRemoved,
    ServerActivated,
    Alert,
    Error,
}

impl EventType {
    /// Every event type, for subscribe-all registration.
    pub fn all() -> [EventType; 11] {
        [
            EventType::MetricCollected,
            EventType::MetricAnalyzed,
            EventType::DecisionMade,
            EventType::ScalingStarted,
            EventType::ScalingComplete,
            EventType::ScalingFailed,
            EventType::ServerAdded,
            EventType::ServerRemoved,
            EventType::ServerActivated,
            EventType::Alert,
            EventType::Error,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

/// An internal system event.
///
/// Delivery is best-effort: a dropped event must never corrupt state, so
/// payloads are self-contained JSON values rather than references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub severity: EventSeverity,
    pub cluster_id: Option<ClusterId>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    pub trace_id: Option<String>,
}

impl Event {
    pub fn new(kind: EventType, cluster_id: &str, message: &str) -> Self {
        Self {
            id: new_id(),
            kind,
            severity: EventSeverity::Info,
            cluster_id: Some(cluster_id.to_string()),
            timestamp: Utc::now(),
            message: message.to_string(),
            data: serde_json::Value::Null,
            trace_id: None,
        }
    }

    pub fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_trace_id(mut self, trace_id: &str) -> Self {
        self.trace_id = Some(trace_id.to_string());
        self
    }
}

// ── Table keys ────────────────────────────────────────────────────

impl ScalingEvent {
    /// Build the composite key for the scaling events table.
    pub fn table_key(&self) -> String {
        format!(
            "{}:{:013}:{}",
            self.cluster_id,
            self.timestamp.timestamp_millis(),
            self.id
        )
    }
}

impl MetricRecord {
    /// Build the composite key for the metrics table.
    pub fn table_key(&self) -> String {
        format!(
            "{}:{:013}:{}",
            self.cluster_id,
            self.time.timestamp_millis(),
            self.server_id
        )
    }
}

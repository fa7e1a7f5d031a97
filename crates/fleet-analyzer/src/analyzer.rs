//! Metric analyzer — aggregates, thresholds, trend, and spike detection.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use fleet_state::{AnalyzedMetrics, ClusterMetrics, ThresholdStatus, Trend};

/// Utilization at or above this level is always critical.
const CRITICAL_THRESHOLD: f64 = 95.0;

/// Spike baseline lookback, in seconds.
const SPIKE_BASELINE_AGE_SECS: i64 = 60;

/// Analyzer thresholds and windows. Shared with the sustained tracker.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// CPU percentage at or above which status is at least warning.
    pub cpu_high: f64,
    /// CPU percentage at or below which the sustained-low timer runs.
    pub cpu_low: f64,
    /// Memory percentage at or above which status is at least warning.
    pub memory_high: f64,
    /// Rolling window for trend calculation.
    pub trend_window: Duration,
    /// Relative CPU increase (percent) that counts as a spike.
    pub spike_threshold: f64,
    /// Snapshots kept per cluster; oldest evicted.
    pub max_history_len: usize,
    /// Mean CPU difference (percentage points) between window halves that
    /// counts as a trend.
    pub trend_delta: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            cpu_high: 80.0,
            cpu_low: 30.0,
            memory_high: 85.0,
            trend_window: Duration::from_secs(300),
            spike_threshold: 50.0,
            max_history_len: 30,
            trend_delta: 3.0,
        }
    }
}

/// One recorded point of a cluster's rolling history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuSnapshot {
    pub timestamp: DateTime<Utc>,
    pub avg_cpu: f64,
    pub avg_memory: f64,
}

/// Analyzes collected metrics against thresholds and rolling history.
pub struct Analyzer {
    config: AnalyzerConfig,
    history: RwLock<HashMap<String, Vec<CpuSnapshot>>>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Analyze one collected sample.
    ///
    /// Empty input yields the zero analysis (normal status, stable trend)
    /// and records nothing.
    pub fn analyze(&self, metrics: &ClusterMetrics) -> AnalyzedMetrics {
        if metrics.servers.is_empty() {
            return AnalyzedMetrics::empty(&metrics.cluster_id, metrics.timestamp);
        }

        let agg = metrics.aggregates();
        self.record_snapshot(
            &metrics.cluster_id,
            metrics.timestamp,
            agg.avg_cpu,
            agg.avg_memory,
        );

        let cpu_status = classify(agg.avg_cpu, self.config.cpu_high);
        let memory_status = classify(agg.avg_memory, self.config.memory_high);
        let trend = self.trend(&metrics.cluster_id);
        let (has_spike, spike_percent) = self.detect_spike(&metrics.cluster_id, agg.avg_cpu);

        let analyzed = AnalyzedMetrics {
            cluster_id: metrics.cluster_id.clone(),
            timestamp: metrics.timestamp,
            avg_cpu: agg.avg_cpu,
            avg_memory: agg.avg_memory,
            max_cpu: agg.max_cpu,
            min_cpu: agg.min_cpu,
            server_count: agg.server_count,
            cpu_status,
            memory_status,
            trend,
            has_spike,
            spike_percent,
            recommendation: recommendation(cpu_status, trend, has_spike).to_string(),
            sustained_high_at: None,
            sustained_low_at: None,
        };

        debug!(
            cluster_id = %metrics.cluster_id,
            avg_cpu = format_args!("{:.1}", agg.avg_cpu),
            ?cpu_status,
            ?trend,
            has_spike,
            "metrics analyzed"
        );

        analyzed
    }

    fn record_snapshot(
        &self,
        cluster_id: &str,
        timestamp: DateTime<Utc>,
        avg_cpu: f64,
        avg_memory: f64,
    ) {
        let mut history = self.history.write().unwrap();
        let entries = history.entry(cluster_id.to_string()).or_default();
        entries.push(CpuSnapshot {
            timestamp,
            avg_cpu,
            avg_memory,
        });
        if entries.len() > self.config.max_history_len {
            let excess = entries.len() - self.config.max_history_len;
            entries.drain(..excess);
        }
    }

    /// Trend over the in-window history: split in half (middle sample goes
    /// to the upper half) and compare mean CPU of the halves.
    fn trend(&self, cluster_id: &str) -> Trend {
        let history = self.history.read().unwrap();
        let Some(entries) = history.get(cluster_id) else {
            return Trend::Stable;
        };
        if entries.len() < 3 {
            return Trend::Stable;
        }

        let window = chrono::Duration::from_std(self.config.trend_window)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let cutoff = Utc::now() - window;
        let recent: Vec<&CpuSnapshot> =
            entries.iter().filter(|s| s.timestamp > cutoff).collect();
        if recent.len() < 3 {
            return Trend::Stable;
        }

        let mid = recent.len() / 2;
        let lower = mean_cpu(&recent[..mid]);
        let upper = mean_cpu(&recent[mid..]);
        let diff = upper - lower;

        if diff > self.config.trend_delta {
            Trend::Rising
        } else if diff < -self.config.trend_delta {
            Trend::Falling
        } else {
            Trend::Stable
        }
    }

    /// Compare current CPU against a roughly minute-old baseline.
    ///
    /// Returns `(has_spike, change_percent)`. The current sample is already
    /// the last history entry when this runs.
    fn detect_spike(&self, cluster_id: &str, current_cpu: f64) -> (bool, f64) {
        let history = self.history.read().unwrap();
        let Some(entries) = history.get(cluster_id) else {
            return (false, 0.0);
        };
        if entries.len() < 2 {
            return (false, 0.0);
        }

        let baseline_cutoff = Utc::now() - chrono::Duration::seconds(SPIKE_BASELINE_AGE_SECS);
        let previous = entries[..entries.len() - 1]
            .iter()
            .rev()
            .find(|s| s.timestamp < baseline_cutoff)
            .unwrap_or(&entries[entries.len() - 2])
            .avg_cpu;

        if previous == 0.0 {
            return (false, 0.0);
        }

        let change_percent = (current_cpu - previous) / previous * 100.0;
        (change_percent >= self.config.spike_threshold, change_percent)
    }

    /// A copy of the recorded history for a cluster.
    pub fn history(&self, cluster_id: &str) -> Vec<CpuSnapshot> {
        let history = self.history.read().unwrap();
        history.get(cluster_id).cloned().unwrap_or_default()
    }

    /// Drop all recorded history for a cluster.
    pub fn clear_history(&self, cluster_id: &str) {
        let mut history = self.history.write().unwrap();
        history.remove(cluster_id);
    }
}

fn classify(value: f64, high_threshold: f64) -> ThresholdStatus {
    if value >= CRITICAL_THRESHOLD {
        ThresholdStatus::Critical
    } else if value >= high_threshold {
        ThresholdStatus::Warning
    } else {
        ThresholdStatus::Normal
    }
}

fn mean_cpu(snapshots: &[&CpuSnapshot]) -> f64 {
    if snapshots.is_empty() {
        return 0.0;
    }
    snapshots.iter().map(|s| s.avg_cpu).sum::<f64>() / snapshots.len() as f64
}

/// Advisory recommendation. Never consumed by the decision engine.
fn recommendation(cpu_status: ThresholdStatus, trend: Trend, has_spike: bool) -> &'static str {
    match (cpu_status, trend, has_spike) {
        (ThresholdStatus::Critical, _, _) => "immediate_scale_up",
        (_, _, true) => "scale_up_spike_detected",
        (ThresholdStatus::Warning, Trend::Rising, _) => "scale_up_rising_trend",
        (ThresholdStatus::Warning, _, _) => "monitor_closely",
        (ThresholdStatus::Normal, Trend::Falling, _) => "consider_scale_down",
        _ => "maintain",
    }
}

//! Sustained-condition tracker — per-cluster timers for how long CPU has
//! held above the high threshold or below the low threshold.
//!
//! `high` and `low` can never be set simultaneously because config
//! validation guarantees `cpu_low < cpu_high`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use fleet_state::AnalyzedMetrics;

use crate::AnalyzerConfig;

#[derive(Default)]
struct Tracked {
    high: HashMap<String, DateTime<Utc>>,
    low: HashMap<String, DateTime<Utc>>,
}

/// Tracks sustained high/low CPU per cluster.
#[derive(Default)]
pub struct SustainedTracker {
    inner: Mutex<Tracked>,
}

impl SustainedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the timers from an analyzed sample and stamp the sample with
    /// the current sustained-start times.
    pub fn update(&self, cluster_id: &str, analyzed: &mut AnalyzedMetrics, config: &AnalyzerConfig) {
        let mut tracked = self.inner.lock().unwrap();
        let now = Utc::now();

        // High timer starts when CPU reaches the threshold, clears below it.
        if analyzed.avg_cpu >= config.cpu_high {
            tracked.high.entry(cluster_id.to_string()).or_insert(now);
        } else {
            tracked.high.remove(cluster_id);
        }

        // Low timer is symmetric around the low threshold.
        if analyzed.avg_cpu <= config.cpu_low {
            tracked.low.entry(cluster_id.to_string()).or_insert(now);
        } else {
            tracked.low.remove(cluster_id);
        }

        analyzed.sustained_high_at = tracked.high.get(cluster_id).copied();
        analyzed.sustained_low_at = tracked.low.get(cluster_id).copied();
    }

    /// How long the cluster has been sustained-high, if it is.
    pub fn high_duration(&self, cluster_id: &str) -> Option<Duration> {
        let tracked = self.inner.lock().unwrap();
        tracked
            .high
            .get(cluster_id)
            .map(|start| (Utc::now() - *start).to_std().unwrap_or_default())
    }

    /// How long the cluster has been sustained-low, if it is.
    pub fn low_duration(&self, cluster_id: &str) -> Option<Duration> {
        let tracked = self.inner.lock().unwrap();
        tracked
            .low
            .get(cluster_id)
            .map(|start| (Utc::now() - *start).to_std().unwrap_or_default())
    }

    /// Clear both timers for a cluster.
    pub fn reset(&self, cluster_id: &str) {
        let mut tracked = self.inner.lock().unwrap();
        tracked.high.remove(cluster_id);
        tracked.low.remove(cluster_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzed_with_cpu(cpu: f64) -> AnalyzedMetrics {
        let mut analyzed = AnalyzedMetrics::empty("c-1", Utc::now());
        analyzed.avg_cpu = cpu;
        analyzed
    }

    fn config() -> AnalyzerConfig {
        AnalyzerConfig::default() // cpu_high 80, cpu_low 30
    }

    #[test]
    fn high_timer_starts_and_holds() {
        let tracker = SustainedTracker::new();

        let mut first = analyzed_with_cpu(85.0);
        tracker.update("c-1", &mut first, &config());
        let started = first.sustained_high_at.unwrap();

        // A later high sample keeps the original start time.
        let mut second = analyzed_with_cpu(90.0);
        tracker.update("c-1", &mut second, &config());
        assert_eq!(second.sustained_high_at, Some(started));
        assert!(second.sustained_low_at.is_none());
        assert!(tracker.high_duration("c-1").is_some());
    }

    #[test]
    fn high_timer_clears_below_threshold() {
        let tracker = SustainedTracker::new();

        let mut high = analyzed_with_cpu(85.0);
        tracker.update("c-1", &mut high, &config());
        assert!(high.sustained_high_at.is_some());

        let mut normal = analyzed_with_cpu(60.0);
        tracker.update("c-1", &mut normal, &config());
        assert!(normal.sustained_high_at.is_none());
        assert!(tracker.high_duration("c-1").is_none());
    }

    #[test]
    fn low_timer_is_symmetric() {
        let tracker = SustainedTracker::new();

        let mut low = analyzed_with_cpu(20.0);
        tracker.update("c-1", &mut low, &config());
        assert!(low.sustained_low_at.is_some());
        assert!(low.sustained_high_at.is_none());

        let mut normal = analyzed_with_cpu(50.0);
        tracker.update("c-1", &mut normal, &config());
        assert!(normal.sustained_low_at.is_none());
    }

    #[test]
    fn high_and_low_never_both_set() {
        let tracker = SustainedTracker::new();

        let mut low = analyzed_with_cpu(20.0);
        tracker.update("c-1", &mut low, &config());

        // Jump straight to high: low clears, high starts.
        let mut high = analyzed_with_cpu(90.0);
        tracker.update("c-1", &mut high, &config());
        assert!(high.sustained_high_at.is_some());
        assert!(high.sustained_low_at.is_none());
    }

    #[test]
    fn boundary_values_count() {
        let tracker = SustainedTracker::new();

        // Exactly at the high threshold starts the timer.
        let mut at_high = analyzed_with_cpu(80.0);
        tracker.update("c-1", &mut at_high, &config());
        assert!(at_high.sustained_high_at.is_some());

        // Exactly at the low threshold starts the low timer.
        let mut at_low = analyzed_with_cpu(30.0);
        tracker.update("c-2", &mut at_low, &config());
        assert!(at_low.sustained_low_at.is_some());
    }

    #[test]
    fn reset_clears_both() {
        let tracker = SustainedTracker::new();
        let mut high = analyzed_with_cpu(90.0);
        tracker.update("c-1", &mut high, &config());

        tracker.reset("c-1");
        assert!(tracker.high_duration("c-1").is_none());
        assert!(tracker.low_duration("c-1").is_none());
    }

    #[test]
    fn timers_are_per_cluster() {
        let tracker = SustainedTracker::new();
        let mut a = analyzed_with_cpu(90.0);
        tracker.update("c-1", &mut a, &config());

        let mut b = analyzed_with_cpu(20.0);
        tracker.update("c-2", &mut b, &config());

        assert!(tracker.high_duration("c-1").is_some());
        assert!(tracker.low_duration("c-2").is_some());
        assert!(tracker.high_duration("c-2").is_none());
    }
}

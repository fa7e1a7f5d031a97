//! fleet-analyzer — rolling statistics over collected telemetry.
//!
//! Turns a raw `ClusterMetrics` sample into an `AnalyzedMetrics` with
//! threshold classification, trend, and spike detection, plus a
//! `SustainedTracker` that times how long CPU has held above/below its
//! thresholds.
//!
//! # Analysis algorithm
//!
//! ```text
//! status:  cpu ≥ 95 → critical; cpu ≥ cpu_high → warning; else normal
//!          (memory mirrors this with memory_high)
//!
//! trend:   over snapshots inside trend_window (need ≥ 3):
//!          Δ = mean(upper half) − mean(lower half)
//!          Δ > +3 → rising; Δ < −3 → falling; else stable
//!
//! spike:   baseline = most recent snapshot older than 60 s
//!          (fallback: the immediately prior snapshot)
//!          change% = (current − baseline) / baseline × 100
//!          spike when change% ≥ spike_threshold
//! ```
//!
//! Per-cluster history is bounded (`max_history_len`, oldest evicted).

pub mod analyzer;
pub mod sustained;

pub use analyzer::{Analyzer, AnalyzerConfig, CpuSnapshot};
pub use sustained::SustainedTracker;

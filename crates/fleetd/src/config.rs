//! fleetscale.toml configuration: loading, defaults, validation.
//!
//! Every section has sensible defaults, so a missing file or an empty
//! table still yields a runnable configuration. `validate()` enforces the
//! invariants the control loops assume; the daemon refuses to start on any
//! violation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use fleet_analyzer::AnalyzerConfig;
use fleet_collector::ResilientConfig;
use fleet_decision::DecisionConfig;
use fleet_orchestrator::OrchestratorConfig;
use fleet_scaler::SimScalerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration:\n{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub app: AppConfig,
    pub collector: CollectorConfig,
    pub analyzer: AnalyzerSection,
    pub decision: DecisionSection,
    pub scaler: ScalerSection,
    pub events: EventsConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "fleetscale".to_string(),
            log_level: "info".to_string(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    /// Telemetry source base URL, e.g. `http://localhost:9000/metrics`.
    pub endpoint: String,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub retry_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    pub circuit_breaker: CircuitBreakerSection,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000/metrics".to_string(),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            circuit_breaker: CircuitBreakerSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerSection {
    pub max_failures: u32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerSection {
    pub thresholds: ThresholdSection,
    #[serde(with = "humantime_serde")]
    pub trend_window: Duration,
    pub spike_threshold: f64,
    pub max_history_length: usize,
}

impl Default for AnalyzerSection {
    fn default() -> Self {
        Self {
            thresholds: ThresholdSection::default(),
            trend_window: Duration::from_secs(300),
            spike_threshold: 50.0,
            max_history_length: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdSection {
    pub cpu_high: f64,
    pub cpu_low: f64,
    pub memory_high: f64,
}

impl Default for ThresholdSection {
    fn default() -> Self {
        Self {
            cpu_high: 80.0,
            cpu_low: 30.0,
            memory_high: 85.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecisionSection {
    #[serde(with = "humantime_serde")]
    pub cooldown_period: Duration,
    /// Defaults to `cooldown_period` when absent.
    #[serde(with = "humantime_serde")]
    pub scale_down_cooldown_period: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub sustained_high_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub sustained_low_duration: Duration,
    pub emergency_cpu_threshold: f64,
    pub min_servers: u32,
    pub max_servers: u32,
    pub max_scale_step: u32,
    pub target_cpu: f64,
}

impl Default for DecisionSection {
    fn default() -> Self {
        Self {
            cooldown_period: Duration::from_secs(300),
            scale_down_cooldown_period: None,
            sustained_high_duration: Duration::from_secs(120),
            sustained_low_duration: Duration::from_secs(600),
            emergency_cpu_threshold: 95.0,
            min_servers: 2,
            max_servers: 10,
            max_scale_step: 3,
            target_cpu: 70.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScalerSection {
    #[serde(with = "humantime_serde")]
    pub provision_time: Duration,
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for ScalerSection {
    fn default() -> Self {
        Self {
            provision_time: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventsConfig {
    pub buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { buffer_size: 100 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// How long per-server metric rows are kept before the retention
    /// sweep removes them.
    #[serde(with = "humantime_serde")]
    pub metric_retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/fleetscale.redb"),
            metric_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Config {
    /// Load and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the control loops assume.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errs = Vec::new();

        if self.app.name.is_empty() {
            errs.push("app.name is required".to_string());
        }
        if !["trace", "debug", "info", "warn", "error"].contains(&self.app.log_level.as_str()) {
            errs.push("app.log_level must be one of: trace, debug, info, warn, error".to_string());
        }

        if self.collector.interval.is_zero() {
            errs.push("collector.interval must be positive".to_string());
        }
        if self.collector.timeout.is_zero() {
            errs.push("collector.timeout must be positive".to_string());
        }
        if self.collector.timeout >= self.collector.interval {
            errs.push("collector.timeout must be less than collector.interval".to_string());
        }
        if self.collector.retry_attempts == 0 {
            errs.push("collector.retry_attempts must be at least 1".to_string());
        }
        if self.collector.circuit_breaker.max_failures == 0 {
            errs.push("collector.circuit_breaker.max_failures must be at least 1".to_string());
        }

        let t = &self.analyzer.thresholds;
        if t.cpu_high <= t.cpu_low {
            errs.push("analyzer.thresholds.cpu_high must be greater than cpu_low".to_string());
        }
        if t.cpu_high <= 0.0 || t.cpu_high >= 100.0 {
            errs.push("analyzer.thresholds.cpu_high must be between 0 and 100".to_string());
        }
        if t.cpu_low <= 0.0 || t.cpu_low >= 100.0 {
            errs.push("analyzer.thresholds.cpu_low must be between 0 and 100".to_string());
        }
        if t.memory_high <= 0.0 || t.memory_high > 100.0 {
            errs.push("analyzer.thresholds.memory_high must be between 0 and 100".to_string());
        }
        if self.analyzer.spike_threshold <= 0.0 {
            errs.push("analyzer.spike_threshold must be positive".to_string());
        }
        if self.analyzer.max_history_length < 3 {
            errs.push("analyzer.max_history_length must be at least 3".to_string());
        }

        if self.decision.min_servers == 0 {
            errs.push("decision.min_servers must be at least 1".to_string());
        }
        if self.decision.max_servers < self.decision.min_servers {
            errs.push("decision.max_servers must be >= min_servers".to_string());
        }
        if self.decision.max_scale_step == 0 {
            errs.push("decision.max_scale_step must be at least 1".to_string());
        }
        if self.decision.cooldown_period.is_zero() {
            errs.push("decision.cooldown_period must be positive".to_string());
        }
        if self
            .decision
            .scale_down_cooldown_period
            .is_some_and(|d| d.is_zero())
        {
            errs.push("decision.scale_down_cooldown_period must be positive".to_string());
        }
        if self.decision.target_cpu <= 0.0 || self.decision.target_cpu >= 100.0 {
            errs.push("decision.target_cpu must be between 0 and 100".to_string());
        }

        if self.events.buffer_size == 0 {
            errs.push("events.buffer_size must be positive".to_string());
        }

        if self.store.metric_retention.is_zero() {
            errs.push("store.metric_retention must be positive".to_string());
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errs.join("\n")))
        }
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            cpu_high: self.analyzer.thresholds.cpu_high,
            cpu_low: self.analyzer.thresholds.cpu_low,
            memory_high: self.analyzer.thresholds.memory_high,
            trend_window: self.analyzer.trend_window,
            spike_threshold: self.analyzer.spike_threshold,
            max_history_len: self.analyzer.max_history_length,
            ..AnalyzerConfig::default()
        }
    }

    pub fn decision_config(&self) -> DecisionConfig {
        DecisionConfig {
            cooldown_period: self.decision.cooldown_period,
            scale_down_cooldown_period: self
                .decision
                .scale_down_cooldown_period
                .unwrap_or(self.decision.cooldown_period),
            sustained_high_duration: self.decision.sustained_high_duration,
            sustained_low_duration: self.decision.sustained_low_duration,
            emergency_cpu_threshold: self.decision.emergency_cpu_threshold,
            min_servers: self.decision.min_servers,
            max_servers: self.decision.max_servers,
            max_scale_step: self.decision.max_scale_step,
            target_cpu: self.decision.target_cpu,
            cpu_high: self.analyzer.thresholds.cpu_high,
            cpu_low: self.analyzer.thresholds.cpu_low,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            collect_interval: self.collector.interval,
            resilient: ResilientConfig {
                max_failures: self.collector.circuit_breaker.max_failures,
                breaker_timeout: self.collector.circuit_breaker.timeout,
                retry_attempts: self.collector.retry_attempts,
                retry_delay: self.collector.retry_delay,
            },
            analyzer: self.analyzer_config(),
            decision: self.decision_config(),
            event_buffer: self.events.buffer_size,
        }
    }

    pub fn sim_scaler_config(&self) -> SimScalerConfig {
        SimScalerConfig {
            provision_time: self.scaler.provision_time,
            drain_timeout: self.scaler.drain_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn parses_full_config() {
        let toml = r#"
            [app]
            name = "fleetscale"
            log_level = "debug"
            shutdown_timeout = "20s"

            [collector]
            endpoint = "http://metrics.internal:9000/metrics"
            interval = "15s"
            timeout = "5s"
            retry_attempts = 2
            retry_delay = "500ms"

            [collector.circuit_breaker]
            max_failures = 4
            timeout = "45s"

            [analyzer]
            trend_window = "3m"
            spike_threshold = 40.0
            max_history_length = 20

            [analyzer.thresholds]
            cpu_high = 75.0
            cpu_low = 25.0
            memory_high = 90.0

            [decision]
            cooldown_period = "2m"
            scale_down_cooldown_period = "8m"
            sustained_high_duration = "90s"
            sustained_low_duration = "5m"
            emergency_cpu_threshold = 93.0
            min_servers = 3
            max_servers = 12
            max_scale_step = 2
            target_cpu = 65.0

            [scaler]
            provision_time = "8s"
            drain_timeout = "20s"

            [events]
            buffer_size = 200

            [store]
            path = "/var/lib/fleetscale/state.redb"
            metric_retention = "12h"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.collector.interval, Duration::from_secs(15));
        assert_eq!(config.collector.retry_delay, Duration::from_millis(500));
        assert_eq!(config.analyzer.thresholds.cpu_high, 75.0);
        assert_eq!(
            config.decision.scale_down_cooldown_period,
            Some(Duration::from_secs(480))
        );
        assert_eq!(config.events.buffer_size, 200);
        assert_eq!(config.store.metric_retention, Duration::from_secs(12 * 60 * 60));

        let decision = config.decision_config();
        assert_eq!(decision.cpu_high, 75.0);
        assert_eq!(decision.max_servers, 12);

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.resilient.max_failures, 4);
        assert_eq!(orchestrator.event_buffer, 200);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [decision]
            max_servers = 20
        "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.decision.max_servers, 20);
        assert_eq!(config.decision.min_servers, 2);
        assert_eq!(config.collector.interval, Duration::from_secs(10));
    }

    #[test]
    fn scale_down_cooldown_falls_back_to_cooldown() {
        let config = Config::default();
        let decision = config.decision_config();
        assert_eq!(
            decision.scale_down_cooldown_period,
            decision.cooldown_period
        );
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.analyzer.thresholds.cpu_high = 30.0;
        config.analyzer.thresholds.cpu_low = 80.0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cpu_high must be greater"));
    }

    #[test]
    fn rejects_timeout_not_less_than_interval() {
        let mut config = Config::default();
        config.collector.timeout = Duration::from_secs(10);
        config.collector.interval = Duration::from_secs(10);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("collector.timeout"));
    }

    #[test]
    fn rejects_zero_min_servers() {
        let mut config = Config::default();
        config.decision.min_servers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_max_below_min() {
        let mut config = Config::default();
        config.decision.min_servers = 5;
        config.decision.max_servers = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_cooldown() {
        let mut config = Config::default();
        config.decision.cooldown_period = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_scale_step() {
        let mut config = Config::default();
        config.decision.max_scale_step = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_metric_retention() {
        let mut config = Config::default();
        config.store.metric_retention = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_log_level() {
        let mut config = Config::default();
        config.app.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn collects_every_violation() {
        let mut config = Config::default();
        config.decision.min_servers = 0;
        config.decision.max_scale_step = 0;
        config.events.buffer_size = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("min_servers"));
        assert!(err.contains("max_scale_step"));
        assert!(err.contains("buffer_size"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [decision]
            cooldown = "5m"
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = Config::from_file(Path::new("/nonexistent/fleetscale.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

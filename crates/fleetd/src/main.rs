//! fleetd — the Fleetscale daemon.
//!
//! Runs the autoscaling control plane against simulated clusters: each
//! cluster gets a pipeline that collects synthetic telemetry, analyzes it,
//! and drives the simulated provisioner.
//!
//! # Usage
//!
//! ```text
//! fleetd run --config fleetscale.toml --clusters 3 --initial-servers 4
//! fleetd check-config --config fleetscale.toml
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use fleet_collector::{Collector, MockCollector, MockConfig};
use fleet_orchestrator::Orchestrator;
use fleet_scaler::{Scaler, ServerRegistry, SimScaler};
use fleet_state::{Cluster, StateStore};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleetscale autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane with simulated clusters.
    Run {
        /// Path to the TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of simulated clusters to drive.
        #[arg(long, default_value = "2")]
        clusters: u32,

        /// Active servers each cluster starts with.
        #[arg(long, default_value = "3")]
        initial_servers: u32,

        /// Baseline CPU percentage of the synthetic telemetry.
        #[arg(long, default_value = "55.0")]
        base_cpu: f64,
    },

    /// Validate a config file and print the effective settings.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            clusters,
            initial_servers,
            base_cpu,
        } => {
            let config = load_config(config.as_deref())?;
            init_tracing(&config.app.log_level);
            run(config, clusters, initial_servers, base_cpu).await
        }
        Command::CheckConfig { config } => {
            let config = Config::from_file(&config)?;
            println!("configuration OK: {config:#?}");
            Ok(())
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(Config::from_file(path)?),
        None => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn init_tracing(log_level: &str) {
    let default_filter = format!("{log_level},fleetd={log_level}");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.parse().expect("valid filter")),
        )
        .init();
}

async fn run(
    config: Config,
    clusters: u32,
    initial_servers: u32,
    base_cpu: f64,
) -> anyhow::Result<()> {
    info!(name = %config.app.name, "fleetscale daemon starting");

    // ── State store ────────────────────────────────────────────────
    if let Some(parent) = config.store.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = StateStore::open(&config.store.path)?;
    info!(path = ?config.store.path, "state store opened");

    // ── Orchestrator ───────────────────────────────────────────────
    let orchestrator = Arc::new(Orchestrator::new(config.orchestrator_config(), store.clone()));
    orchestrator.start();

    // ── Simulated clusters ─────────────────────────────────────────
    // One shared collector and scaler serve every cluster; pipelines stay
    // isolated because all state inside them is keyed by cluster id.
    let collector = Arc::new(MockCollector::new(MockConfig {
        base_cpu,
        ..MockConfig::default()
    }));
    // Server lifecycle events go onto the orchestrator's bus alongside the
    // pipeline events.
    let registry = Arc::new(ServerRegistry::new().with_events(orchestrator.publisher()));
    let scaler = Arc::new(SimScaler::new(
        Arc::clone(&registry),
        config.sim_scaler_config(),
    ));

    for i in 0..clusters {
        let cluster = Cluster::new(
            &format!("sim-{i}"),
            config.decision.min_servers,
            config.decision.max_servers,
        );
        store.put_cluster(&cluster)?;

        collector.set_cluster_servers(&cluster.id, initial_servers as usize);
        scaler.initialize_cluster(&cluster.id, initial_servers);

        orchestrator
            .start_cluster(
                &cluster,
                Arc::clone(&collector) as Arc<dyn Collector>,
                Arc::clone(&scaler) as Arc<dyn Scaler>,
            )
            .await?;
    }
    info!(clusters, initial_servers, "simulated clusters started");

    // ── Metric-history retention sweep ─────────────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let retention_store = store.clone();
    let retention = config.store.metric_retention;
    let retention_handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(RETENTION_SWEEP_INTERVAL) => {
                    sweep_metric_history(&retention_store, retention);
                }
                _ = shutdown.changed() => break,
            }
        }
    });

    // ── Run until shutdown ─────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    orchestrator.stop(config.app.shutdown_timeout).await;
    let _ = retention_handle.await;
    info!("fleetscale daemon stopped");
    Ok(())
}

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Drop metric rows older than the retention window, per cluster.
fn sweep_metric_history(store: &StateStore, retention: Duration) {
    let cutoff = chrono::Utc::now()
        - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::hours(24));

    let clusters = match store.list_clusters() {
        Ok(clusters) => clusters,
        Err(e) => {
            tracing::warn!(error = %e, "metric retention sweep failed");
            return;
        }
    };

    for cluster in clusters {
        match store.prune_metric_records(&cluster.id, cutoff) {
            Ok(0) => {}
            Ok(removed) => {
                info!(cluster_id = %cluster.id, removed, "pruned metric history");
            }
            Err(e) => {
                tracing::warn!(cluster_id = %cluster.id, error = %e, "metric retention sweep failed");
            }
        }
    }
}

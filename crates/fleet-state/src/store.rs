//! StateStore — redb-backed persistence for Fleetscale.
//!
//! Three tables, one shape: `&str` composite keys, JSON row values. The
//! generic row plumbing (`write_row` / `read_row` / `scan_prefix`) carries
//! all of them; the public API is the domain surface on top — cluster CRUD
//! with bounds validation, append-only scaling events and metric history,
//! and a retention sweep for the metric table.
//!
//! The control loops never read from the store to make decisions; it is an
//! append-only sink for the event persister plus cluster CRUD for the
//! admin path. Write failures are reported to the caller and logged, never
//! fed back into scaling decisions.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        // Opening a table in a write transaction creates it if absent.
        let txn = self.db.begin_write()?;
        for table in [CLUSTERS, SCALING_EVENTS, METRICS] {
            txn.open_table(table)?;
        }
        txn.commit()?;
        Ok(())
    }

    // ── Generic row plumbing ───────────────────────────────────────

    fn write_row<T: Serialize>(&self, table: Table, key: &str, row: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(row).map_err(|e| StateError::Encode(e.to_string()))?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(table)?;
            table.insert(key, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn read_row<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        let Some(guard) = table.get(key)? else {
            return Ok(None);
        };
        Ok(Some(decode(key, guard.value())?))
    }

    fn delete_row(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut table = txn.open_table(table)?;
            existed = table.remove(key)?.is_some();
        }
        txn.commit()?;
        Ok(existed)
    }

    /// Collect up to `limit` rows whose key starts with `prefix`. Keys
    /// embed a fixed-width millis timestamp, so reverse iteration yields
    /// newest-first.
    fn scan_prefix<T: DeserializeOwned>(
        &self,
        table: Table,
        prefix: &str,
        limit: usize,
        newest_first: bool,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        let range = table.iter()?;
        let entries: Box<dyn Iterator<Item = _> + '_> = if newest_first {
            Box::new(range.rev())
        } else {
            Box::new(range)
        };

        let mut rows = Vec::new();
        for entry in entries {
            let (key, value) = entry?;
            if key.value().starts_with(prefix) {
                rows.push(decode(key.value(), value.value())?);
                if rows.len() >= limit {
                    break;
                }
            }
        }
        Ok(rows)
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Insert or update a cluster. Bounds are checked here so a record
    /// that would wedge its pipeline (`min_servers = 0`, inverted bounds)
    /// never reaches disk.
    pub fn put_cluster(&self, cluster: &Cluster) -> StateResult<()> {
        if cluster.min_servers == 0 {
            return Err(StateError::InvalidCluster(format!(
                "{}: min_servers must be at least 1",
                cluster.id
            )));
        }
        if cluster.max_servers < cluster.min_servers {
            return Err(StateError::InvalidCluster(format!(
                "{}: max_servers {} below min_servers {}",
                cluster.id, cluster.max_servers, cluster.min_servers
            )));
        }

        self.write_row(CLUSTERS, &cluster.id, cluster)?;
        debug!(cluster_id = %cluster.id, "cluster stored");
        Ok(())
    }

    /// Get a cluster by id.
    pub fn get_cluster(&self, cluster_id: &str) -> StateResult<Option<Cluster>> {
        self.read_row(CLUSTERS, cluster_id)
    }

    /// List all clusters.
    pub fn list_clusters(&self) -> StateResult<Vec<Cluster>> {
        self.scan_prefix(CLUSTERS, "", usize::MAX, false)
    }

    /// Delete a cluster by id. Returns true if it existed.
    pub fn delete_cluster(&self, cluster_id: &str) -> StateResult<bool> {
        let existed = self.delete_row(CLUSTERS, cluster_id)?;
        debug!(%cluster_id, existed, "cluster deleted");
        Ok(existed)
    }

    // ── Scaling events ─────────────────────────────────────────────

    /// Append an executed scaling event.
    pub fn put_scaling_event(&self, event: &ScalingEvent) -> StateResult<()> {
        self.write_row(SCALING_EVENTS, &event.table_key(), event)
    }

    /// List recent scaling events for a cluster, newest first.
    pub fn list_scaling_events(
        &self,
        cluster_id: &str,
        limit: usize,
    ) -> StateResult<Vec<ScalingEvent>> {
        self.scan_prefix(SCALING_EVENTS, &format!("{cluster_id}:"), limit, true)
    }

    // ── Metric history ─────────────────────────────────────────────

    /// Append one per-server metric row.
    pub fn put_metric_record(&self, record: &MetricRecord) -> StateResult<()> {
        self.write_row(METRICS, &record.table_key(), record)
    }

    /// Append every server row of a collected sample in one transaction.
    pub fn put_metrics(&self, metrics: &ClusterMetrics) -> StateResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(METRICS)?;
            for server in &metrics.servers {
                let record = MetricRecord {
                    time: metrics.timestamp,
                    cluster_id: metrics.cluster_id.clone(),
                    server_id: server.server_id.clone(),
                    cpu_usage: server.cpu_usage,
                    memory_usage: server.memory_usage,
                    request_load: server.request_load,
                };
                let bytes = serde_json::to_vec(&record)
                    .map_err(|e| StateError::Encode(e.to_string()))?;
                table.insert(record.table_key().as_str(), bytes.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// List recent metric rows for a cluster, newest first.
    pub fn list_metric_records(
        &self,
        cluster_id: &str,
        limit: usize,
    ) -> StateResult<Vec<MetricRecord>> {
        self.scan_prefix(METRICS, &format!("{cluster_id}:"), limit, true)
    }

    /// Delete a cluster's metric rows older than `before`. Returns the
    /// number removed. The millis segment of the key is zero-padded, so
    /// plain string comparison against the cutoff key is ordering-correct.
    pub fn prune_metric_records(
        &self,
        cluster_id: &str,
        before: DateTime<Utc>,
    ) -> StateResult<usize> {
        let prefix = format!("{cluster_id}:");
        let cutoff = format!("{cluster_id}:{:013}", before.timestamp_millis());

        let doomed: Vec<String> = {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(METRICS)?;
            let mut keys = Vec::new();
            for entry in table.iter()? {
                let (key, _) = entry?;
                let key = key.value();
                if key.starts_with(&prefix) && key < cutoff.as_str() {
                    keys.push(key.to_string());
                }
            }
            keys
        };

        if doomed.is_empty() {
            return Ok(0);
        }

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(METRICS)?;
            for key in &doomed {
                table.remove(key.as_str())?;
            }
        }
        txn.commit()?;
        debug!(%cluster_id, removed = doomed.len(), "metric history pruned");
        Ok(doomed.len())
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|source| StateError::Corrupt {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn test_cluster(name: &str) -> Cluster {
        Cluster::new(name, 2, 10)
    }

    fn test_scaling_event(cluster_id: &str, offset_secs: i64) -> ScalingEvent {
        ScalingEvent {
            id: new_id(),
            cluster_id: cluster_id.to_string(),
            timestamp: Utc::now() + Duration::seconds(offset_secs),
            action: ScalingAction::ScaleUp,
            servers_before: 2,
            servers_after: 4,
            trigger_reason: "cpu_critical".to_string(),
            prediction_used: false,
            confidence: None,
            status: ScalingEventStatus::Success,
        }
    }

    fn test_metrics(cluster_id: &str, server_count: usize) -> ClusterMetrics {
        ClusterMetrics {
            cluster_id: cluster_id.to_string(),
            timestamp: Utc::now(),
            servers: (0..server_count)
                .map(|i| ServerMetric {
                    server_id: format!("s-{i}"),
                    cpu_usage: 50.0,
                    memory_usage: 60.0,
                    request_load: 100,
                })
                .collect(),
        }
    }

    // ── Cluster CRUD ───────────────────────────────────────────────

    #[test]
    fn cluster_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let cluster = test_cluster("web");

        store.put_cluster(&cluster).unwrap();
        let retrieved = store.get_cluster(&cluster.id).unwrap();

        assert_eq!(retrieved, Some(cluster));
    }

    #[test]
    fn cluster_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_cluster("nope").unwrap().is_none());
    }

    #[test]
    fn cluster_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cluster(&test_cluster("a")).unwrap();
        store.put_cluster(&test_cluster("b")).unwrap();
        store.put_cluster(&test_cluster("c")).unwrap();

        assert_eq!(store.list_clusters().unwrap().len(), 3);
    }

    #[test]
    fn cluster_update_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut cluster = test_cluster("web");
        store.put_cluster(&cluster).unwrap();

        cluster.max_servers = 20;
        cluster.status = ClusterStatus::Paused;
        store.put_cluster(&cluster).unwrap();

        let retrieved = store.get_cluster(&cluster.id).unwrap().unwrap();
        assert_eq!(retrieved.max_servers, 20);
        assert_eq!(retrieved.status, ClusterStatus::Paused);
    }

    #[test]
    fn cluster_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let cluster = test_cluster("web");
        store.put_cluster(&cluster).unwrap();

        assert!(store.delete_cluster(&cluster.id).unwrap());
        assert!(!store.delete_cluster(&cluster.id).unwrap());
        assert!(store.get_cluster(&cluster.id).unwrap().is_none());
    }

    #[test]
    fn put_cluster_rejects_bad_bounds() {
        let store = StateStore::open_in_memory().unwrap();

        let mut cluster = test_cluster("bad");
        cluster.min_servers = 0;
        assert!(matches!(
            store.put_cluster(&cluster).unwrap_err(),
            StateError::InvalidCluster(_)
        ));

        cluster.min_servers = 5;
        cluster.max_servers = 3;
        assert!(matches!(
            store.put_cluster(&cluster).unwrap_err(),
            StateError::InvalidCluster(_)
        ));

        // Nothing reached disk.
        assert!(store.list_clusters().unwrap().is_empty());
    }

    // ── Scaling events ─────────────────────────────────────────────

    #[test]
    fn scaling_event_put_and_list() {
        let store = StateStore::open_in_memory().unwrap();
        for offset in [0, 10, 20] {
            store
                .put_scaling_event(&test_scaling_event("c-1", offset))
                .unwrap();
        }
        store
            .put_scaling_event(&test_scaling_event("c-2", 0))
            .unwrap();

        let events = store.list_scaling_events("c-1", 10).unwrap();
        assert_eq!(events.len(), 3);
        // Newest first.
        assert!(events[0].timestamp >= events[1].timestamp);
        assert!(events[1].timestamp >= events[2].timestamp);

        let limited = store.list_scaling_events("c-1", 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    // ── Metric history ─────────────────────────────────────────────

    #[test]
    fn metrics_put_writes_one_row_per_server() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_metrics(&test_metrics("c-1", 3)).unwrap();
        store.put_metrics(&test_metrics("c-2", 1)).unwrap();

        let rows = store.list_metric_records("c-1", 10).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.cluster_id == "c-1"));

        let other = store.list_metric_records("c-2", 10).unwrap();
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn metric_records_respect_limit() {
        let store = StateStore::open_in_memory().unwrap();
        for _ in 0..5 {
            store.put_metrics(&test_metrics("c-1", 2)).unwrap();
        }

        let rows = store.list_metric_records("c-1", 4).unwrap();
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn prune_drops_only_old_rows_of_that_cluster() {
        let store = StateStore::open_in_memory().unwrap();

        let mut old = test_metrics("c-1", 2);
        old.timestamp = Utc::now() - Duration::hours(2);
        store.put_metrics(&old).unwrap();
        store.put_metrics(&test_metrics("c-1", 2)).unwrap();
        store.put_metrics(&test_metrics("c-2", 1)).unwrap();

        let cutoff = Utc::now() - Duration::hours(1);
        assert_eq!(store.prune_metric_records("c-1", cutoff).unwrap(), 2);

        // Fresh rows and the other cluster survive.
        assert_eq!(store.list_metric_records("c-1", 10).unwrap().len(), 2);
        assert_eq!(store.list_metric_records("c-2", 10).unwrap().len(), 1);

        // A second sweep finds nothing.
        assert_eq!(store.prune_metric_records("c-1", cutoff).unwrap(), 0);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        let cluster = test_cluster("durable");
        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_cluster(&cluster).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let retrieved = store.get_cluster(&cluster.id).unwrap();
        assert_eq!(retrieved, Some(cluster));
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_clusters().unwrap().is_empty());
        assert!(store.list_scaling_events("any", 10).unwrap().is_empty());
        assert!(store.list_metric_records("any", 10).unwrap().is_empty());
        assert!(!store.delete_cluster("nope").unwrap());
        assert_eq!(store.prune_metric_records("any", Utc::now()).unwrap(), 0);
    }
}

//! redb table definitions for the Fleetscale state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Composite keys lead with the cluster id so a cluster's records form one
//! contiguous key range.

use redb::TableDefinition;

/// Cluster definitions keyed by `{cluster_id}`.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Executed scaling events keyed by `{cluster_id}:{millis}:{event_id}`.
pub const SCALING_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("scaling_events");

/// Per-server metric rows keyed by `{cluster_id}:{millis}:{server_id}`.
pub const METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics");

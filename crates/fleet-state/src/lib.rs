//! fleet-state — domain types and embedded state store for Fleetscale.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for cluster definitions, executed scaling events, and per-server
//! metric history.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{cluster_id}:{millis}`, `{cluster_id}:{millis}:{server}`)
//! enable efficient prefix scans for a cluster's records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;

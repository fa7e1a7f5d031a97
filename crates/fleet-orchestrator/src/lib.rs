//! fleet-orchestrator — per-cluster control loops with independent
//! lifecycle.
//!
//! A [`Pipeline`] owns one cluster's loop:
//!
//! ```text
//! tick → collect → analyze → track → state → decide → (maybe) scale
//!        with events published at every stage
//! ```
//!
//! Cycles are strictly serialized per cluster and bounded by a deadline
//! smaller than the tick interval, so a slow cycle cannot back up ticks.
//! A panicking cycle is contained and reported; only shutdown ends the
//! loop.
//!
//! The [`Orchestrator`] owns the shared event bus, the event persister,
//! and the pipeline map. `stop` drains every pipeline concurrently within
//! a budget, then shuts the persister down and closes the bus.

pub mod orchestrator;
pub mod pipeline;

use thiserror::Error;

pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use pipeline::{Pipeline, PipelineConfig};

/// Errors from orchestrator lifecycle operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("pipeline already exists for cluster {0}")]
    PipelineExists(String),

    #[error("no pipeline found for cluster {0}")]
    PipelineNotFound(String),
}

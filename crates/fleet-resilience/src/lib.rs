//! fleet-resilience — circuit breaker for Fleetscale's I/O edges.
//!
//! A three-state machine (`Closed → Open → HalfOpen`) protecting a fallible
//! operation:
//!
//! ```text
//! Closed:   operation runs; failures ≥ max_failures → Open
//! Open:     operation rejected; after timeout the next admission → HalfOpen
//! HalfOpen: operation runs; successes ≥ half_open_max → Closed,
//!           any failure → Open
//! ```
//!
//! The breaker never holds its lock across the protected operation:
//! `execute` acquires admission, awaits the operation with the lock
//! released, then records the outcome. State-change listeners are
//! dispatched on fresh tasks, so they can never re-enter the breaker or
//! block a caller.

pub mod breaker;

pub use breaker::{
    BreakerConfig, BreakerError, BreakerStats, CircuitBreaker, CircuitState, StateListener,
};

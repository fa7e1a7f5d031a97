//! fleet-decision — the scaling policy.
//!
//! Turns an analyzed sample plus the cluster's server-count snapshot into a
//! `ScalingDecision`. Evaluation order, first match wins:
//!
//! ```text
//! 1. emergency   avg_cpu ≥ emergency threshold and capacity left
//!                → scale up by max_scale_step, bypassing cooldown
//! 2. scale up    critical CPU / spike / warning+rising / sustained high /
//!                high-confidence prediction, capacity permitting —
//!                gated by cooldown_period
//! 3. scale down  sustained low or low+falling, trend not rising, above
//!                min, and no predicted spike — one server at a time,
//!                gated by its own scale_down_cooldown_period
//! 4. maintain    within normal parameters
//! ```
//!
//! The two cooldown timers are independent: a matched direction waits out
//! only its own timer, so a short scale-down window is not masked by a
//! longer scale-up window (or vice versa).
//!
//! The engine is pure policy plus a `last scale` timestamp per cluster; the
//! pipeline is the sole writer of that timestamp (`record_scaling` after a
//! scaler-accepted operation).

pub mod engine;

pub use engine::{DecisionConfig, DecisionEngine};

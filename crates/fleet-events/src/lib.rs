//! fleet-events — typed in-process event fan-out.
//!
//! The [`EventBus`] broadcasts [`Event`](fleet_state::Event)s to
//! per-subscriber bounded channels. Publishing is always non-blocking: a
//! full subscriber channel drops the event for that subscriber only, with
//! a warning log. Delivery is best-effort by design — consumers must never
//! depend on seeing every event.
//!
//! [`EventPublisher`] is the write-side convenience wrapper the pipeline
//! uses; [`EventPersister`] drains a subscribe-all channel into the state
//! store (metric rows and executed scaling events).

pub mod bus;
pub mod persister;
pub mod publisher;

pub use bus::EventBus;
pub use persister::EventPersister;
pub use publisher::EventPublisher;

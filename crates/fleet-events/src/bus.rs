//! Topic-based event broadcaster with bounded per-subscriber buffers.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use fleet_state::{Event, EventType};

struct BusInner {
    /// Per-topic subscriber senders. A subscribe-all sender appears under
    /// every topic.
    subscribers: HashMap<EventType, Vec<mpsc::Sender<Event>>>,
    closed: bool,
}

/// Fan-out bus for pipeline events.
///
/// Closing the bus drops every sender, which closes each subscriber's
/// channel exactly once (a subscribe-all channel is one sender cloned
/// under every topic; all clones are dropped together). Publishes after
/// close are silently ignored.
pub struct EventBus {
    inner: RwLock<BusInner>,
    buffer_size: usize,
}

impl EventBus {
    /// Create a bus with the given per-subscriber channel capacity.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            inner: RwLock::new(BusInner {
                subscribers: HashMap::new(),
                closed: false,
            }),
            buffer_size: if buffer_size == 0 { 100 } else { buffer_size },
        }
    }

    /// Subscribe to one event type.
    pub fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let mut inner = self.inner.write().unwrap();
        inner.subscribers.entry(event_type).or_default().push(tx);
        rx
    }

    /// Subscribe to every event type on a single channel.
    pub fn subscribe_all(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let mut inner = self.inner.write().unwrap();
        for event_type in EventType::all() {
            inner
                .subscribers
                .entry(event_type)
                .or_default()
                .push(tx.clone());
        }
        rx
    }

    /// Deliver an event to every subscriber of its type, never blocking.
    ///
    /// Subscribers with a full buffer miss this event; everyone else still
    /// receives it.
    pub fn publish(&self, event: Event) {
        let inner = self.inner.read().unwrap();
        if inner.closed {
            return;
        }

        let Some(subscribers) = inner.subscribers.get(&event.kind) else {
            return;
        };
        for tx in subscribers {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(event_type = ?event.kind, "event channel full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Receiver went away; the sender is cleaned up on close.
                }
            }
        }
    }

    /// Close the bus: all subscriber channels end, later publishes no-op.
    pub fn close(&self) {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.subscribers.clear();
        debug!("event bus closed");
    }

    /// Number of subscriptions for a type (subscribe-all counts once per type).
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        let inner = self.inner.read().unwrap();
        inner
            .subscribers
            .get(&event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

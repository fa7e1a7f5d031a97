//! Event persister — drains a subscribe-all channel into the state store.
//!
//! Persistence is best-effort: store failures are logged and the loop
//! keeps going. Nothing downstream of the persister feeds back into
//! control decisions.

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use fleet_state::{ClusterMetrics, Event, EventSeverity, EventType, ScalingEvent, StateStore};

/// Writes scaling events and metric rows from the event stream.
pub struct EventPersister {
    store: StateStore,
}

impl EventPersister {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Drain events until the channel closes or shutdown fires.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("event persister started");
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.process(event),
                        None => break, // bus closed
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("event persister stopped");
    }

    fn process(&self, event: Event) {
        // Mirror every event into the structured log at its severity.
        let cluster_id = event.cluster_id.as_deref().unwrap_or("-");
        match event.severity {
            EventSeverity::Critical => {
                error!(event_type = ?event.kind, %cluster_id, trace_id = ?event.trace_id, "{}", event.message);
            }
            EventSeverity::Warning => {
                warn!(event_type = ?event.kind, %cluster_id, trace_id = ?event.trace_id, "{}", event.message);
            }
            EventSeverity::Info => {
                debug!(event_type = ?event.kind, %cluster_id, trace_id = ?event.trace_id, "{}", event.message);
            }
        }

        match event.kind {
            EventType::ScalingComplete => self.persist_scaling_event(&event),
            EventType::MetricCollected => self.persist_metrics(&event),
            _ => {}
        }
    }

    fn persist_scaling_event(&self, event: &Event) {
        let scaling_event: ScalingEvent = match serde_json::from_value(event.data.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "scaling_complete event with unparseable payload");
                return;
            }
        };

        if let Err(e) = self.store.put_scaling_event(&scaling_event) {
            error!(
                cluster_id = %scaling_event.cluster_id,
                error = %e,
                "failed to persist scaling event"
            );
        }
    }

    fn persist_metrics(&self, event: &Event) {
        let metrics: ClusterMetrics = match serde_json::from_value(event.data.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "metric_collected event with unparseable payload");
                return;
            }
        };

        if let Err(e) = self.store.put_metrics(&metrics) {
            error!(
                cluster_id = %metrics.cluster_id,
                error = %e,
                "failed to persist metrics"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use fleet_state::{ScalingAction, ScalingDecision, ScalingEventStatus, ServerMetric};

    use crate::{EventBus, EventPublisher};

    fn test_metrics(cluster_id: &str) -> ClusterMetrics {
        ClusterMetrics {
            cluster_id: cluster_id.to_string(),
            timestamp: Utc::now(),
            servers: vec![
                ServerMetric {
                    server_id: "s-1".to_string(),
                    cpu_usage: 42.0,
                    memory_usage: 61.0,
                    request_load: 120,
                },
                ServerMetric {
                    server_id: "s-2".to_string(),
                    cpu_usage: 55.0,
                    memory_usage: 48.0,
                    request_load: 80,
                },
            ],
        }
    }

    fn test_scaling_event(cluster_id: &str) -> ScalingEvent {
        let decision = ScalingDecision {
            cluster_id: cluster_id.to_string(),
            timestamp: Utc::now(),
            action: ScalingAction::ScaleUp,
            current_servers: 2,
            target_servers: 4,
            reason: "cpu_critical".to_string(),
            prediction_used: false,
            confidence: None,
            is_emergency: false,
            cooldown_active: false,
        };
        ScalingEvent::from_decision(&decision, ScalingEventStatus::Success)
    }

    async fn drain_until<F: Fn() -> bool>(check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn persists_metrics_and_scaling_events() {
        let store = StateStore::open_in_memory().unwrap();
        let bus = Arc::new(EventBus::new(100));
        let publisher = EventPublisher::new(Arc::clone(&bus));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let persister = EventPersister::new(store.clone());
        let all = bus.subscribe_all();
        let handle = tokio::spawn(persister.run(all, shutdown_rx));

        publisher.metric_collected("c-1", &test_metrics("c-1"));
        publisher.scaling_complete("c-1", &test_scaling_event("c-1"));

        let metric_store = store.clone();
        drain_until(|| {
            metric_store.list_metric_records("c-1", 10).unwrap().len() == 2
                && metric_store.list_scaling_events("c-1", 10).unwrap().len() == 1
        })
        .await;

        let _ = shutdown_tx.send(true);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn ignores_non_persisted_event_types() {
        let store = StateStore::open_in_memory().unwrap();
        let bus = Arc::new(EventBus::new(100));
        let publisher = EventPublisher::new(Arc::clone(&bus));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let all = bus.subscribe_all();
        let handle = tokio::spawn(EventPersister::new(store.clone()).run(all, shutdown_rx));

        publisher.error("c-1", "collection failed", &"timeout");
        publisher.alert(
            "c-1",
            EventSeverity::Warning,
            "breaker opened",
            serde_json::Value::Null,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(store.list_metric_records("c-1", 10).unwrap().is_empty());
        assert!(store.list_scaling_events("c-1", 10).unwrap().is_empty());

        let _ = shutdown_tx.send(true);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn garbage_payload_does_not_stop_the_loop() {
        let store = StateStore::open_in_memory().unwrap();
        let bus = Arc::new(EventBus::new(100));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let all = bus.subscribe_all();
        let handle = tokio::spawn(EventPersister::new(store.clone()).run(all, shutdown_rx));

        // Malformed scaling_complete payload, then a valid one.
        bus.publish(
            Event::new(EventType::ScalingComplete, "c-1", "bogus")
                .with_data(serde_json::json!({"nope": true})),
        );
        EventPublisher::new(Arc::clone(&bus)).scaling_complete("c-1", &test_scaling_event("c-1"));

        let check_store = store.clone();
        drain_until(|| check_store.list_scaling_events("c-1", 10).unwrap().len() == 1).await;

        let _ = shutdown_tx.send(true);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_when_bus_closes() {
        let store = StateStore::open_in_memory().unwrap();
        let bus = Arc::new(EventBus::new(100));

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let all = bus.subscribe_all();
        let handle = tokio::spawn(EventPersister::new(store).run(all, shutdown_rx));

        bus.close();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("persister should stop when the bus closes")
            .unwrap();
    }
}

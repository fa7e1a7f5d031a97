//! Event publisher — the write side of the bus, one constructor per event
//! kind the pipeline emits.

use std::sync::Arc;

use serde_json::json;

use fleet_state::{
    AnalyzedMetrics, ClusterMetrics, Event, EventSeverity, EventType, ScalingDecision,
    ScalingEvent, Server,
};

use crate::EventBus;

/// Publishes typed events onto the shared bus.
///
/// Cheap to clone; every pipeline gets its own copy.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<EventBus>,
    trace_id: Option<String>,
}

impl EventPublisher {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            trace_id: None,
        }
    }

    /// A copy of this publisher that stamps every event with a trace id.
    pub fn with_trace_id(&self, trace_id: &str) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            trace_id: Some(trace_id.to_string()),
        }
    }

    fn publish(&self, mut event: Event) {
        if let Some(ref trace_id) = self.trace_id {
            event.trace_id = Some(trace_id.clone());
        }
        self.bus.publish(event);
    }

    pub fn metric_collected(&self, cluster_id: &str, metrics: &ClusterMetrics) {
        self.publish(
            Event::new(EventType::MetricCollected, cluster_id, "metrics collected")
                .with_data(serde_json::to_value(metrics).unwrap_or_default()),
        );
    }

    pub fn metric_analyzed(&self, cluster_id: &str, analyzed: &AnalyzedMetrics) {
        let mut event = Event::new(EventType::MetricAnalyzed, cluster_id, "metrics analyzed")
            .with_data(serde_json::to_value(analyzed).unwrap_or_default());
        if analyzed.is_critical() {
            event = event.with_severity(EventSeverity::Critical);
        } else if analyzed.is_warning() {
            event = event.with_severity(EventSeverity::Warning);
        }
        self.publish(event);
    }

    pub fn decision_made(&self, cluster_id: &str, decision: &ScalingDecision) {
        let message = format!("scaling decision: {}", decision.action);
        let mut event = Event::new(EventType::DecisionMade, cluster_id, &message)
            .with_data(serde_json::to_value(decision).unwrap_or_default());
        if decision.is_emergency {
            event = event.with_severity(EventSeverity::Critical);
        }
        self.publish(event);
    }

    pub fn scaling_started(&self, cluster_id: &str, decision: &ScalingDecision) {
        let message = format!("scaling started: {}", decision.action);
        self.publish(
            Event::new(EventType::ScalingStarted, cluster_id, &message)
                .with_data(serde_json::to_value(decision).unwrap_or_default()),
        );
    }

    pub fn scaling_complete(&self, cluster_id: &str, scaling_event: &ScalingEvent) {
        let message = format!("scaling complete: {}", scaling_event.action);
        self.publish(
            Event::new(EventType::ScalingComplete, cluster_id, &message)
                .with_data(serde_json::to_value(scaling_event).unwrap_or_default()),
        );
    }

    pub fn scaling_failed(&self, cluster_id: &str, reason: &str, error: &dyn std::fmt::Display) {
        let message = format!("scaling failed: {reason}");
        self.publish(
            Event::new(EventType::ScalingFailed, cluster_id, &message)
                .with_severity(EventSeverity::Critical)
                .with_data(json!({
                    "reason": reason,
                    "error": error.to_string(),
                })),
        );
    }

    pub fn server_added(&self, server: &Server) {
        self.publish(
            Event::new(EventType::ServerAdded, &server.cluster_id, "server added")
                .with_data(serde_json::to_value(server).unwrap_or_default()),
        );
    }

    pub fn server_removed(&self, server: &Server) {
        self.publish(
            Event::new(EventType::ServerRemoved, &server.cluster_id, "server removed")
                .with_data(serde_json::to_value(server).unwrap_or_default()),
        );
    }

    pub fn server_activated(&self, server: &Server) {
        self.publish(
            Event::new(
                EventType::ServerActivated,
                &server.cluster_id,
                "server activated",
            )
            .with_data(serde_json::to_value(server).unwrap_or_default()),
        );
    }

    pub fn alert(
        &self,
        cluster_id: &str,
        severity: EventSeverity,
        message: &str,
        data: serde_json::Value,
    ) {
        self.publish(
            Event::new(EventType::Alert, cluster_id, message)
                .with_severity(severity)
                .with_data(data),
        );
    }

    pub fn error(&self, cluster_id: &str, message: &str, error: &dyn std::fmt::Display) {
        self.publish(
            Event::new(EventType::Error, cluster_id, message)
                .with_severity(EventSeverity::Critical)
                .with_data(json!({"error": error.to_string()})),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_state::{ScalingAction, ScalingEventStatus};

    fn bus_and_publisher() -> (Arc<EventBus>, EventPublisher) {
        let bus = Arc::new(EventBus::new(10));
        let publisher = EventPublisher::new(Arc::clone(&bus));
        (bus, publisher)
    }

    fn decision(action: ScalingAction, is_emergency: bool) -> ScalingDecision {
        ScalingDecision {
            cluster_id: "c-1".to_string(),
            timestamp: Utc::now(),
            action,
            current_servers: 2,
            target_servers: 4,
            reason: "cpu_critical".to_string(),
            prediction_used: false,
            confidence: None,
            is_emergency,
            cooldown_active: false,
        }
    }

    #[tokio::test]
    async fn decision_event_carries_payload() {
        let (bus, publisher) = bus_and_publisher();
        let mut rx = bus.subscribe(EventType::DecisionMade);

        publisher.decision_made("c-1", &decision(ScalingAction::ScaleUp, false));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.severity, EventSeverity::Info);
        assert_eq!(event.cluster_id.as_deref(), Some("c-1"));
        let parsed: ScalingDecision = serde_json::from_value(event.data).unwrap();
        assert_eq!(parsed.target_servers, 4);
    }

    #[tokio::test]
    async fn emergency_decision_is_critical() {
        let (bus, publisher) = bus_and_publisher();
        let mut rx = bus.subscribe(EventType::DecisionMade);

        publisher.decision_made("c-1", &decision(ScalingAction::ScaleUp, true));
        assert_eq!(rx.recv().await.unwrap().severity, EventSeverity::Critical);
    }

    #[tokio::test]
    async fn scaling_failed_is_critical_with_error() {
        let (bus, publisher) = bus_and_publisher();
        let mut rx = bus.subscribe(EventType::ScalingFailed);

        publisher.scaling_failed("c-1", "cpu_critical", &"provisioner unreachable");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.severity, EventSeverity::Critical);
        assert_eq!(event.data["reason"], "cpu_critical");
        assert_eq!(event.data["error"], "provisioner unreachable");
    }

    #[tokio::test]
    async fn scaling_complete_round_trips() {
        let (bus, publisher) = bus_and_publisher();
        let mut rx = bus.subscribe(EventType::ScalingComplete);

        let scaling_event = ScalingEvent::from_decision(
            &decision(ScalingAction::ScaleUp, false),
            ScalingEventStatus::Success,
        );
        publisher.scaling_complete("c-1", &scaling_event);

        let event = rx.recv().await.unwrap();
        let parsed: ScalingEvent = serde_json::from_value(event.data).unwrap();
        assert_eq!(parsed.status, ScalingEventStatus::Success);
        assert_eq!(parsed.servers_after, 4);
    }

    #[tokio::test]
    async fn trace_id_is_stamped() {
        let (bus, publisher) = bus_and_publisher();
        let mut rx = bus.subscribe(EventType::Error);

        let traced = publisher.with_trace_id("trace-42");
        traced.error("c-1", "collection failed", &"timeout");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.trace_id.as_deref(), Some("trace-42"));
    }

    #[tokio::test]
    async fn server_lifecycle_events() {
        let (bus, publisher) = bus_and_publisher();
        let mut added = bus.subscribe(EventType::ServerAdded);
        let mut activated = bus.subscribe(EventType::ServerActivated);

        let mut server = Server::new("c-1");
        publisher.server_added(&server);
        server.activate();
        publisher.server_activated(&server);

        assert_eq!(added.recv().await.unwrap().kind, EventType::ServerAdded);
        let event = activated.recv().await.unwrap();
        let parsed: Server = serde_json::from_value(event.data).unwrap();
        assert!(parsed.is_active());
    }
}

use async_trait::async_trait;
use tokio::sync::broadcast;
use std::sync::Arc;

use super::event_bus::EventBus;
use crate::events::Event;
use crate::infrastructure::logging::BoundaryLogger;

/// Broadcast-based implementation of EventBus
#[derive(Clone)]
pub struct BroadcastEventBus {
    tx: broadcast::Sender<Event>,
    logger: Arc<BoundaryLogger>,
}

impl BroadcastEventBus {
    /// Create a new BroadcastEventBus with given capacity
    pub fn new(capacity: usize, logger: Arc<BoundaryLogger>) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx, logger }
    }

    /// Create with default capacity (1000 events)
    pub fn new_default(logger: Arc<BoundaryLogger>) -> Self {
        Self::new(1000, logger)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn emit(&self, event: Event) {
        let trace_id = event.session_id().unwrap_or("system").to_string();
        self.logger.event_emit(&trace_id, "EventBus", event.event_type());

        // Emit event (ignore if no receivers)
        let _ = self.tx.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionStatus;

    #[tokio::test]
    async fn test_event_bus_emit_and_subscribe() {
        let logger = Arc::new(BoundaryLogger::new());
        let bus = BroadcastEventBus::new_default(logger);

        let mut rx = bus.subscribe();

        let event = Event::deployment_status("api_1", "api", SessionStatus::Running);
        bus.emit(event.clone()).await;

        let received = rx.recv().await.unwrap();
        match (&event, &received) {
            (Event::DeploymentStatus { session_id: id1, .. }, Event::DeploymentStatus { session_id: id2, .. }) => {
                assert_eq!(id1, id2);
            }
            _ => panic!("Event type mismatch"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let logger = Arc::new(BoundaryLogger::new());
        let bus = BroadcastEventBus::new_default(logger);

        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(Event::deployment_log("api_2", "cloned", "Cloned".to_string())).await;

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_ignored() {
        let bus = BroadcastEventBus::new(4, Arc::new(BoundaryLogger::new()));
        bus.emit(Event::error(None, "nobody listening".to_string())).await;

        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }
}

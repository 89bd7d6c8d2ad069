//! Event fan-out
//!
//! Committed state changes become [`CoreEvent`]s on a broadcast ring:
//! bounded, drop-oldest for lagging subscribers. A bridge task mirrors
//! every event onto the message bus under its topic for external
//! observers.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use chorus_bus::MessageBus;
use chorus_core::CoreEvent;
use chorus_room::EventSink;

/// Default event ring capacity per subscriber
const EVENT_RING: usize = 256;

/// In-process event channel
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<CoreEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(EVENT_RING)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(8));
        Self { tx }
    }

    /// Emit after the described change is committed
    pub fn emit(&self, event: CoreEvent) {
        tracing::trace!(topic = event.topic(), "event");
        let _ = self.tx.send(event);
    }

    /// New observer; lagging observers skip the oldest events
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Adapter for the arbiter's callback shape
    pub fn sink(&self) -> EventSink {
        let hub = self.clone();
        Arc::new(move |event| hub.emit(event))
    }

    /// Mirror every event to the bus as JSON on its topic
    ///
    /// Backpressure and disconnects are logged and skipped; the bus offers
    /// no better than at-least-once anyway.
    pub fn bridge_to_bus(&self, bus: Arc<dyn MessageBus>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let payload = match serde_json::to_vec(&event) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                tracing::error!(error = %e, "event not serializable");
                                continue;
                            },
                        };
                        if let Err(e) = bus.publish(event.topic(), payload.into()) {
                            tracing::debug!(topic = event.topic(), error = %e, "event publish dropped");
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event bridge lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_bus::InProcessBus;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn created(id: &str) -> CoreEvent {
        CoreEvent::AgentCreated {
            agent_id: id.into(),
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscribers_see_events() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe();
        hub.emit(created("a1"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic(), "agent.created");
    }

    #[tokio::test]
    async fn test_bridge_publishes_to_bus() {
        let hub = EventHub::default();
        let bus = InProcessBus::connected();
        let hits = Arc::new(AtomicUsize::new(0));
        let handler_hits = hits.clone();
        bus.subscribe(
            "agent.created",
            Arc::new(move |_topic, payload| {
                assert!(serde_json::from_slice::<serde_json::Value>(&payload).is_ok());
                handler_hits.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        let _bridge = hub.bridge_to_bus(bus.clone());
        hub.emit(created("a1"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let hub = EventHub::new(8);
        let mut rx = hub.subscribe();
        for i in 0..50 {
            hub.emit(created(&format!("a{}", i)));
        }
        // First recv reports the lag, then delivery resumes from the ring
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected lag, got {:?}", other.map(|e| e.topic())),
        }
        assert!(rx.recv().await.is_ok());
    }
}

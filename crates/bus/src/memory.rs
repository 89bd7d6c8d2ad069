//! In-process bus implementation
//!
//! One bounded queue and one delivery task per subscriber. Publishing walks
//! the topic's subscriber list, enqueues where there is room, and reports
//! `Backpressure` when any subscriber queue was full. Nothing is ever
//! redelivered after a drop, matching the at-least-once-no-better contract.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{BusError, BusHandler, MessageBus, SubscriptionId};

/// Per-subscriber queue depth before publishes see backpressure
const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<(String, Bytes)>,
}

/// In-process topic-addressed bus
pub struct InProcessBus {
    connected: AtomicBool,
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessBus {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Connected bus, ready for publish/subscribe
    pub fn connected() -> Arc<Self> {
        let bus = Arc::new(Self::new());
        bus.connected.store(true, Ordering::SeqCst);
        bus
    }
}

#[async_trait::async_trait]
impl MessageBus for InProcessBus {
    async fn connect(&self) -> Result<(), BusError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping senders ends every delivery task
        self.subscribers.write().clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::TransportUnavailable("not connected".into()));
        }

        let subs = self.subscribers.read();
        let Some(list) = subs.get(topic) else {
            return Ok(());
        };

        let mut saturated = false;
        for sub in list {
            match sub.tx.try_send((topic.to_string(), payload.clone())) {
                Ok(()) => {},
                Err(mpsc::error::TrySendError::Full(_)) => saturated = true,
                Err(mpsc::error::TrySendError::Closed(_)) => {},
            }
        }

        if saturated {
            Err(BusError::Backpressure(topic.to_string()))
        } else {
            Ok(())
        }
    }

    fn subscribe(&self, topic: &str, handler: BusHandler) -> Result<SubscriptionId, BusError> {
        if !self.is_connected() {
            return Err(BusError::TransportUnavailable("not connected".into()));
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, mut rx) = mpsc::channel::<(String, Bytes)>(SUBSCRIBER_QUEUE_DEPTH);

        tokio::spawn(async move {
            while let Some((topic, payload)) = rx.recv().await {
                handler(&topic, payload);
            }
        });

        self.subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { id, tx });

        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        let mut subs = self.subscribers.write();
        let mut found = false;
        for list in subs.values_mut() {
            let before = list.len();
            list.retain(|s| s.id != id);
            found |= list.len() != before;
        }
        if found {
            Ok(())
        } else {
            Err(BusError::UnknownSubscription)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_handler(counter: Arc<AtomicUsize>) -> BusHandler {
        Arc::new(move |_topic, _payload| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = InProcessBus::connected();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("agent.speak", counting_handler(hits.clone()))
            .unwrap();

        bus.publish("agent.speak", Bytes::from_static(b"{}")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_publish_other_topic_not_delivered() {
        let bus = InProcessBus::connected();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("agent.speak", counting_handler(hits.clone()))
            .unwrap();

        bus.publish("agent.delete", Bytes::from_static(b"{}"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnected_publish_fails() {
        let bus = InProcessBus::new();
        let err = bus
            .publish("agent.speak", Bytes::from_static(b"{}"))
            .unwrap_err();
        assert!(matches!(err, BusError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = InProcessBus::connected();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = bus
            .subscribe("room.joined", counting_handler(hits.clone()))
            .unwrap();
        bus.unsubscribe(id).unwrap();

        bus.publish("room.joined", Bytes::from_static(b"{}")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backpressure_when_queue_full() {
        let bus = InProcessBus::connected();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("agent.create", counting_handler(hits.clone()))
            .unwrap();

        // No await between publishes, so the delivery task never drains:
        // the queue fills to its depth and the next publish reports it.
        let mut saw_backpressure = false;
        for _ in 0..SUBSCRIBER_QUEUE_DEPTH + 2 {
            if let Err(BusError::Backpressure(_)) =
                bus.publish("agent.create", Bytes::from_static(b"{}"))
            {
                saw_backpressure = true;
                break;
            }
        }
        assert!(saw_backpressure);
    }
}

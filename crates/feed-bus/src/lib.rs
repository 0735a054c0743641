use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::broadcast;

/// Default per-topic buffer. A snapshot merge can emit one record per entity, so this is
/// sized above a typical page window.
pub const DEFAULT_TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage<T> {
    pub topic: String,
    pub payload: T,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no subscribers on topic {0}")]
    NoSubscribers(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Fan-out of typed records to any number of observers, keyed by topic.
pub trait Bus<T>: Send + Sync {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage<T>>;
    /// Returns the number of receivers the record was delivered to.
    fn publish(&self, topic: &str, payload: T) -> BusResult<usize>;
}

/// In-process bus backed by one tokio broadcast channel per topic.
#[derive(Debug)]
pub struct LocalBus<T> {
    capacity: usize,
    topics: parking_lot::RwLock<HashMap<String, broadcast::Sender<BusMessage<T>>>>,
}

impl<T: Clone> LocalBus<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage<T>> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl<T: Clone> Default for LocalBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Bus<T> for LocalBus<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage<T>> {
        self.sender_for(topic).subscribe()
    }

    fn publish(&self, topic: &str, payload: T) -> BusResult<usize> {
        let sender = self.sender_for(topic);
        sender
            .send(BusMessage {
                topic: topic.to_string(),
                payload,
            })
            .map_err(|_| BusError::NoSubscribers(topic.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_bus_round_trip() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("timeline");
        let delivered = bus.publish("timeline", 42u64).expect("publish ok");
        assert_eq!(delivered, 1);
        let msg = sub.recv().await.expect("receive ok");
        assert_eq!(msg.topic, "timeline");
        assert_eq!(msg.payload, 42);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = LocalBus::new();
        let mut timeline = bus.subscribe("timeline");
        let mut chat = bus.subscribe("group_chat");
        bus.publish("group_chat", "hello".to_string()).unwrap();

        let msg = chat.recv().await.unwrap();
        assert_eq!(msg.payload, "hello");
        assert!(matches!(
            timeline.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn publish_without_observers_reports_it() {
        let bus: LocalBus<u8> = LocalBus::new();
        let err = bus.publish("workflow", 1).unwrap_err();
        assert!(matches!(err, BusError::NoSubscribers(topic) if topic == "workflow"));
        assert_eq!(bus.subscriber_count("workflow"), 0);
    }

    #[tokio::test]
    async fn every_observer_receives_each_record() {
        let bus = LocalBus::new();
        let mut first = bus.subscribe("timeline");
        let mut second = bus.subscribe("timeline");
        assert_eq!(bus.subscriber_count("timeline"), 2);

        assert_eq!(bus.publish("timeline", 7i32).unwrap(), 2);
        assert_eq!(first.recv().await.unwrap().payload, 7);
        assert_eq!(second.recv().await.unwrap().payload, 7);
    }
}

//! Telemetry bus
//!
//! Topic-keyed broadcast of JSON frames to station subscribers. The
//! simulation core only sees the `Publisher` trait; the in-process
//! `TelemetryBus` implements it with per-topic broadcast channels.
//!
//! Back-pressure: each subscriber has a bounded queue of 100 frames and
//! a lagging subscriber loses the oldest frames first. Telemetry is
//! soft-real-time; missed frames are acceptable.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Per-subscriber queue depth before the oldest frames are dropped
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 100;

/// Sink the simulation publishes frames into
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, frame: Value);
}

/// A published telemetry message
#[derive(Debug, Clone)]
pub struct Frame {
    pub topic: String,
    pub data: Value,
}

/// In-process topic broker backed by broadcast channels
pub struct TelemetryBus {
    topics: RwLock<HashMap<String, broadcast::Sender<Frame>>>,
}

impl TelemetryBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a topic; frames published after this call are
    /// delivered until the receiver is dropped.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Frame> {
        let mut topics = self.topics.write().expect("bus lock poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_QUEUE_DEPTH).0)
            .subscribe()
    }

    fn sender_for(&self, topic: &str) -> Option<broadcast::Sender<Frame>> {
        let topics = self.topics.read().expect("bus lock poisoned");
        topics.get(topic).cloned()
    }
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for TelemetryBus {
    fn publish(&self, topic: &str, frame: Value) {
        // No subscribers yet means nothing to deliver; publishing is
        // never an error for the simulation.
        if let Some(sender) = self.sender_for(topic) {
            let _ = sender.send(Frame {
                topic: topic.to_string(),
                data: frame,
            });
        }
    }
}

/// Publisher that discards every frame (tests, headless runs)
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _topic: &str, _frame: Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribe_then_publish() {
        let bus = TelemetryBus::new();
        let mut rx = bus.subscribe("tick:helm");
        bus.publish("tick:helm", json!({"speed": 8.0}));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.topic, "tick:helm");
        assert_eq!(frame.data["speed"], 8.0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = TelemetryBus::new();
        bus.publish("tick:debug", json!({}));
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = TelemetryBus::new();
        let mut helm = bus.subscribe("tick:helm");
        let _sonar = bus.subscribe("tick:sonar");
        bus.publish("tick:sonar", json!({"contacts": []}));
        assert!(helm.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_drops_oldest() {
        let bus = TelemetryBus::new();
        let mut rx = bus.subscribe("tick:all");
        for i in 0..(SUBSCRIBER_QUEUE_DEPTH + 10) {
            bus.publish("tick:all", json!({"tick": i}));
        }
        // The first frames were dropped; the receiver reports the lag
        // before resuming with the surviving frames.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n >= 10),
            Ok(_) => panic!("expected lag report"),
            Err(e) => panic!("unexpected error: {e}"),
        }
        let frame = rx.recv().await.unwrap();
        assert!(frame.data["tick"].as_u64().unwrap() >= 10);
    }
}

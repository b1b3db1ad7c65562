//! Event system for per-tick transients and persisted records
//!
//! Transient events accumulate during a tick, ride out in every station
//! frame, and are cleared after publishing. The same values double as
//! payloads for the append-only event store.

use serde::{Deserialize, Serialize};

/// An event raised during one simulation tick
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TickEvent {
    /// An emission (ping, mast) was heard by the opposing side
    #[serde(rename = "counterDetected")]
    CounterDetected { by: String, at_s: f64 },

    #[serde(rename = "torpedo.armed")]
    TorpedoArmed { id: String, name: String },

    #[serde(rename = "torpedo.detonated")]
    TorpedoDetonated { id: String, target: String, range_m: f64 },

    #[serde(rename = "torpedo.self_destruct")]
    TorpedoSelfDestruct { id: String, reason: String, range_m: f64 },

    #[serde(rename = "torpedo.spoofed")]
    TorpedoSpoofed { id: String, seconds: f64 },

    #[serde(rename = "torpedo.quick_launched")]
    TorpedoQuickLaunched { ship_id: String, bearing: f64, run_depth: f64 },

    #[serde(rename = "depth_charges.dropped")]
    DepthChargesDropped { ship_id: String, count: u32, spread_m: f64 },

    #[serde(rename = "depth_charge.hit")]
    DepthChargeHit { target: String, range_m: f64 },

    #[serde(rename = "depth_charge.near")]
    DepthChargeNear { target: String, range_m: f64 },

    #[serde(rename = "depth_charge.detonated")]
    DepthChargeDetonated { depth_m: f64, x: f64, y: f64 },
}

impl TickEvent {
    /// Event kind string used by the persisted event store
    pub fn kind(&self) -> &'static str {
        match self {
            TickEvent::CounterDetected { .. } => "counterDetected",
            TickEvent::TorpedoArmed { .. } => "torpedo.armed",
            TickEvent::TorpedoDetonated { .. } => "torpedo.detonated",
            TickEvent::TorpedoSelfDestruct { .. } => "torpedo.self_destruct",
            TickEvent::TorpedoSpoofed { .. } => "torpedo.spoofed",
            TickEvent::TorpedoQuickLaunched { .. } => "torpedo.quick_launched",
            TickEvent::DepthChargesDropped { .. } => "depth_charges.dropped",
            TickEvent::DepthChargeHit { .. } => "depth_charge.hit",
            TickEvent::DepthChargeNear { .. } => "depth_charge.near",
            TickEvent::DepthChargeDetonated { .. } => "depth_charge.detonated",
        }
    }
}

/// Accumulates events raised during the current tick
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<TickEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TickEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TickEvent> {
        self.events.iter()
    }

    /// Take all queued events, leaving the queue empty
    pub fn drain(&mut self) -> Vec<TickEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_carries_type_tag() {
        let event = TickEvent::TorpedoArmed {
            id: "t1".to_string(),
            name: "Mk48".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "torpedo.armed");
        assert_eq!(value["name"], "Mk48");
    }

    #[test]
    fn test_queue_drain_empties() {
        let mut queue = EventQueue::new();
        queue.push(TickEvent::CounterDetected {
            by: "ownship".to_string(),
            at_s: 1.0,
        });
        assert_eq!(queue.len(), 1);
        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty());
    }
}

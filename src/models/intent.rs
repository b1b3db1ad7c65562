//! Fleet intent models
//!
//! `FleetIntent` is the normalized plan produced by the fleet-level
//! agent and consumed by the per-ship agents and the apply path. It is
//! owned by the tick executor and replaced wholesale when a fleet run
//! validates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-ship objective within a fleet plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipObjective {
    /// Destination `[x, y]` in meters (x east, y north)
    pub destination: [f64; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_kn: Option<f64>,
    pub goal: String,
}

/// Fleet-wide emissions-control posture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmconPolicy {
    pub active_ping_allowed: bool,
    pub radio_discipline: String,
}

impl Default for EmconPolicy {
    fn default() -> Self {
        Self {
            active_ping_allowed: false,
            radio_discipline: "restricted".to_string(),
        }
    }
}

/// Free-text advisory, optionally addressed to one ship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentNote {
    #[serde(default)]
    pub ship_id: Option<String>,
    pub text: String,
}

/// The normalized fleet plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetIntent {
    pub objectives: BTreeMap<String, ShipObjective>,
    pub emcon: EmconPolicy,
    pub summary: String,
    pub notes: Vec<IntentNote>,
}

impl FleetIntent {
    /// One-line human rendering of the plan, used when the agent did not
    /// provide a summary of its own.
    pub fn summarize(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let dests: Vec<String> = self
            .objectives
            .iter()
            .map(|(id, obj)| match obj.speed_kn {
                Some(spd) => format!(
                    "{} to [{:.0},{:.0}] at {:.0} kn",
                    id, obj.destination[0], obj.destination[1], spd
                ),
                None => format!("{} to [{:.0},{:.0}]", id, obj.destination[0], obj.destination[1]),
            })
            .collect();
        if !dests.is_empty() {
            parts.push(format!("Objectives: {}", dests.join(", ")));
        }
        let notes: Vec<&str> = self.notes.iter().map(|n| n.text.as_str()).collect();
        if !notes.is_empty() {
            parts.push(notes.join("; "));
        }
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_includes_objectives_and_notes() {
        let mut intent = FleetIntent::default();
        intent.objectives.insert(
            "red-01".to_string(),
            ShipObjective {
                destination: [4000.0, -2000.0],
                speed_kn: Some(12.0),
                goal: "Transit to patrol box".to_string(),
            },
        );
        intent.notes.push(IntentNote {
            ship_id: None,
            text: "Hold EMCON".to_string(),
        });
        let line = intent.summarize();
        assert!(line.contains("red-01"));
        assert!(line.contains("12 kn"));
        assert!(line.contains("Hold EMCON"));
    }

    #[test]
    fn test_deserialize_llm_shape() {
        let raw = r#"{
            "objectives": {"red-01": {"destination": [1000, 2000], "goal": "patrol"}},
            "emcon": {"active_ping_allowed": false, "radio_discipline": "restricted"},
            "summary": "hold the line",
            "notes": [{"ship_id": null, "text": "stay quiet"}]
        }"#;
        let intent: FleetIntent = serde_json::from_str(raw).unwrap();
        assert_eq!(intent.objectives.len(), 1);
        assert!(intent.objectives["red-01"].speed_kn.is_none());
        assert_eq!(intent.summary, "hold the line");
    }
}

//! Sensor contact models
//!
//! Passive sonar contacts, active ping responses, synthetic contacts
//! (projectiles, explosions, counter-detections), visual contact memory
//! entries, and the fleet-wide contact history record.

use serde::{Deserialize, Serialize};

/// A passive sonar contact as reported to the sonar station.
///
/// Bearing-only by design; range is never known passively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SonarContact {
    pub id: String,
    pub bearing: f64,
    pub strength: f64,
    #[serde(rename = "classifiedAs")]
    pub classified_as: String,
    pub confidence: f64,
    #[serde(rename = "bearingKnown")]
    pub bearing_known: bool,
    #[serde(rename = "rangeKnown")]
    pub range_known: bool,
    pub detectability: f64,
    #[serde(rename = "snrDb")]
    pub snr_db: f64,
    #[serde(rename = "bearingSigmaDeg")]
    pub bearing_sigma_deg: f64,
}

/// A single active sonar return
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub id: String,
    pub bearing: f64,
    pub range_est: f64,
    pub strength: f64,
    /// Sim time the ping was answered
    pub at_s: f64,
}

/// A synthetic contact injected outside the passive model: torpedoes in
/// the water, explosions, and counter-detected active sonar emitters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticContact {
    /// Ship whose sensor picture this contact belongs to
    pub observer_id: String,
    pub contact_id: String,
    pub kind: String,
    pub bearing: f64,
    pub strength: f64,
    pub confidence: f64,
    #[serde(rename = "rangeKnown")]
    pub range_known: bool,
    /// Sim time of creation; counter-detections expire 5 s later
    pub at_s: f64,
}

/// Memory of prior visual detections of one target by one observer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualMemoryEntry {
    pub last_seen_s: f64,
    pub detection_count: u32,
    pub last_confidence: f64,
}

/// One entry in the fleet-wide rolling contact history.
///
/// Only sensor-derived data: passive entries are bearing-only, visual
/// entries carry an estimated range/position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactEvent {
    pub at_s: f64,
    #[serde(rename = "reportedBy")]
    pub reported_by: String,
    pub reporter_pos: [f64; 2],
    /// Sensor type: "passive" | "visual" | "active"
    pub sensor: String,
    pub contact_id: String,
    pub bearing: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_est: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub est_pos: Option<[f64; 2]>,
    pub confidence: f64,
    #[serde(rename = "classifiedAs")]
    pub classified_as: String,
}

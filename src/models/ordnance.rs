//! Ordnance models
//!
//! Torpedoes and depth charges live in the `World` from launch until
//! detonation, self-destruct, or run-time expiry.

use serde::{Deserialize, Serialize};

use super::ship::Side;

/// Static definition of a torpedo type, carried by loaded tubes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TorpedoDef {
    pub name: String,
    pub speed_kn: f64,
    pub seeker_cone_deg: f64,
    pub seeker_range_m: f64,
    pub enable_range_m: f64,
    pub max_run_time_s: f64,
}

impl Default for TorpedoDef {
    fn default() -> Self {
        Self {
            name: "Mk48".to_string(),
            speed_kn: 45.0,
            seeker_cone_deg: 35.0,
            seeker_range_m: 4000.0,
            enable_range_m: 800.0,
            max_run_time_s: 600.0,
        }
    }
}

/// A torpedo in the water
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Torpedo {
    pub id: String,
    pub name: String,
    pub side: Side,
    /// Ship that fired; arming and self-destruct ranges are measured
    /// against this ship's current position
    pub shooter_id: String,
    pub x: f64,
    pub y: f64,
    pub depth: f64,
    pub heading: f64,
    pub speed_kn: f64,
    pub armed: bool,
    pub enable_range_m: f64,
    pub seeker_range_m: f64,
    pub seeker_cone_deg: f64,
    pub run_time_s: f64,
    pub max_run_time_s: f64,
    pub run_depth: f64,
    pub doctrine: String,
    /// Remaining seconds of degraded guidance after a countermeasure
    pub spoofed_timer_s: f64,
    /// Proportional-navigation constant
    pub pn_nav_const: f64,
    /// Line-of-sight bearing from the previous guidance step
    pub los_prev: Option<f64>,
}

impl Torpedo {
    /// Whether the weapon has exceeded its maximum run time
    pub fn expired(&self) -> bool {
        self.run_time_s > self.max_run_time_s
    }

    /// Force expiry on the next cleanup pass (detonation, self-destruct)
    pub fn terminate(&mut self) {
        self.run_time_s = self.max_run_time_s + 1.0;
    }
}

/// A depth charge sinking toward its fused depth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthCharge {
    pub id: String,
    pub side: Side,
    pub x: f64,
    pub y: f64,
    pub depth: f64,
    pub target_depth: f64,
    pub sink_rate_mps: f64,
    pub armed: bool,
    pub exploded: bool,
}

impl DepthCharge {
    /// Charges that sink well past their fuse depth are duds
    pub fn expired(&self) -> bool {
        self.exploded || self.depth > self.target_depth * 2.0 + 50.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_torpedo_terminate_expires() {
        let mut t = Torpedo {
            id: "t1".to_string(),
            name: "Mk48".to_string(),
            side: Side::Blue,
            shooter_id: "ownship".to_string(),
            x: 0.0,
            y: 0.0,
            depth: 100.0,
            heading: 0.0,
            speed_kn: 45.0,
            armed: false,
            enable_range_m: 800.0,
            seeker_range_m: 4000.0,
            seeker_cone_deg: 35.0,
            run_time_s: 0.0,
            max_run_time_s: 600.0,
            run_depth: 100.0,
            doctrine: "passive_then_active".to_string(),
            spoofed_timer_s: 0.0,
            pn_nav_const: 3.0,
            los_prev: None,
        };
        assert!(!t.expired());
        t.terminate();
        assert!(t.expired());
    }

    #[test]
    fn test_depth_charge_dud_expiry() {
        let dc = DepthCharge {
            id: "dc1".to_string(),
            side: Side::Red,
            x: 0.0,
            y: 0.0,
            depth: 500.0,
            target_depth: 60.0,
            sink_rate_mps: 5.0,
            armed: true,
            exploded: false,
        };
        assert!(dc.expired());
    }
}

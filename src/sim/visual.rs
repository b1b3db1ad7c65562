//! Probabilistic visual detection with contact memory
//!
//! Every five seconds each observer sweeps the horizon: shallow targets
//! within visual range may be spotted with a probability that falls off
//! with range, scaled up for big silhouettes, and boosted by prior
//! sightings. Successful detections refresh a per-observer memory that
//! carries contacts for thirty seconds and is garbage collected after
//! two minutes.

use rand::Rng;
use rand::rngs::StdRng;
use std::collections::HashMap;

use crate::models::{Ship, ShipClass, Side, contacts::VisualMemoryEntry};
use crate::world::World;

pub const SCAN_INTERVAL_S: f64 = 5.0;
pub const VISUAL_RANGE_M: f64 = 15_000.0;
/// Targets deeper than this cannot be seen
pub const TARGET_MAX_DEPTH_M: f64 = 5.0;
/// Observers deeper than this cannot see
pub const OBSERVER_MAX_DEPTH_M: f64 = 10.0;
/// A previously seen target stays a contact this long while in range
pub const CARRYOVER_S: f64 = 30.0;
/// Memory entries older than this are dropped
pub const MEMORY_GC_S: f64 = 120.0;

/// State of the visual detection system across ticks
#[derive(Debug, Default)]
pub struct VisualDetection {
    /// observer id -> target id -> memory
    memory: HashMap<String, HashMap<String, VisualMemoryEntry>>,
    scan_timer: f64,
    /// Debug override: BLUE observers detect with certainty
    pub force_player: bool,
    /// Debug override: RED observers detect with certainty
    pub force_enemy: bool,
}

fn class_multiplier(class: ShipClass) -> f64 {
    match class {
        ShipClass::Convoy => 1.3,
        ShipClass::Destroyer => 1.1,
        ShipClass::Ssn => 1.0,
    }
}

impl VisualDetection {
    pub fn new() -> Self {
        Self {
            scan_timer: SCAN_INTERVAL_S,
            ..Self::default()
        }
    }

    /// Viewing mode for an observer: surfaced lookouts see better than a
    /// periscope.
    pub fn mode_for(observer: &Ship) -> &'static str {
        if observer.kin.depth <= 1.0 { "surface" } else { "periscope" }
    }

    /// Advance the scan timer and run the sweep when it elapses
    pub fn step(&mut self, world: &World, now_s: f64, dt: f64, rng: &mut StdRng) {
        self.scan_timer -= dt;
        if self.scan_timer > 0.0 {
            return;
        }
        self.scan_timer = SCAN_INTERVAL_S;
        self.scan(world, now_s, rng);
        self.gc(now_s);
    }

    fn scan(&mut self, world: &World, now_s: f64, rng: &mut StdRng) {
        for observer in world.all_ships() {
            if observer.kin.depth > OBSERVER_MAX_DEPTH_M {
                continue;
            }
            let forced = match observer.side {
                Side::Blue => self.force_player,
                Side::Red => self.force_enemy,
            };
            for target in world.all_ships() {
                if target.id == observer.id || target.kin.depth > TARGET_MAX_DEPTH_M {
                    continue;
                }
                let range = observer.kin.range_to(&target.kin);
                if range > VISUAL_RANGE_M {
                    continue;
                }
                let base = (1.0 - range / VISUAL_RANGE_M).max(0.0)
                    * class_multiplier(target.ship_class);
                let prior = self
                    .memory
                    .get(&observer.id)
                    .and_then(|m| m.get(&target.id))
                    .map(|e| e.detection_count)
                    .unwrap_or(0);
                let bonus = (0.2 * prior as f64).min(0.5);
                let p = if forced { 1.0 } else { (base + bonus).min(0.95) };
                if rng.random::<f64>() < p {
                    let confidence = if Self::mode_for(observer) == "surface" { 0.9 } else { 0.7 };
                    let entry = self
                        .memory
                        .entry(observer.id.clone())
                        .or_default()
                        .entry(target.id.clone())
                        .or_default();
                    entry.last_seen_s = now_s;
                    entry.detection_count += 1;
                    entry.last_confidence = confidence;
                }
            }
        }
    }

    fn gc(&mut self, now_s: f64) {
        for targets in self.memory.values_mut() {
            targets.retain(|_, e| now_s - e.last_seen_s <= MEMORY_GC_S);
        }
        self.memory.retain(|_, targets| !targets.is_empty());
    }

    /// Whether `target` counts as a visual contact for `observer` right
    /// now: seen within the carry-over window and still inside range.
    pub fn is_contact(&self, observer: &Ship, target: &Ship, now_s: f64) -> bool {
        let Some(entry) = self
            .memory
            .get(&observer.id)
            .and_then(|m| m.get(&target.id))
        else {
            return false;
        };
        now_s - entry.last_seen_s <= CARRYOVER_S
            && observer.kin.range_to(&target.kin) <= VISUAL_RANGE_M
    }

    /// Memory entry for a pair, if any
    pub fn entry(&self, observer_id: &str, target_id: &str) -> Option<&VisualMemoryEntry> {
        self.memory.get(observer_id).and_then(|m| m.get(target_id))
    }

    /// Reset all memory (restart, mission swap)
    pub fn clear(&mut self) {
        self.memory.clear();
        self.scan_timer = SCAN_INTERVAL_S;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{builtin_catalog, spawn_ship};
    use crate::models::Kinematics;
    use rand::SeedableRng;

    fn surface_world(target_range: f64, target_depth: f64, observer_depth: f64) -> World {
        let catalog = builtin_catalog();
        let mut world = World::new();
        world.add_ship(spawn_ship(
            &catalog["SSN"],
            "ownship",
            Side::Blue,
            Kinematics {
                depth: observer_depth,
                ..Default::default()
            },
        ));
        world.add_ship(spawn_ship(
            &catalog["Convoy"],
            "red-01",
            Side::Red,
            Kinematics {
                x: target_range,
                depth: target_depth,
                ..Default::default()
            },
        ));
        world
    }

    fn run_scans(visual: &mut VisualDetection, world: &World, scans: u32, rng: &mut StdRng) -> f64 {
        let mut now = 0.0;
        for _ in 0..scans {
            now += SCAN_INTERVAL_S;
            visual.step(world, now, SCAN_INTERVAL_S, rng);
        }
        now
    }

    #[test]
    fn test_close_surface_target_is_spotted() {
        let world = surface_world(1000.0, 1.0, 0.0);
        let mut visual = VisualDetection::new();
        let mut rng = StdRng::seed_from_u64(1);
        let now = run_scans(&mut visual, &world, 4, &mut rng);
        let own = world.get_ship("ownship").unwrap();
        let red = world.get_ship("red-01").unwrap();
        // p ~ 0.93 per scan; four scans make a miss astronomically rare
        assert!(visual.is_contact(own, red, now));
    }

    #[test]
    fn test_deep_target_never_spotted() {
        let world = surface_world(1000.0, 50.0, 0.0);
        let mut visual = VisualDetection::new();
        let mut rng = StdRng::seed_from_u64(1);
        let now = run_scans(&mut visual, &world, 20, &mut rng);
        let own = world.get_ship("ownship").unwrap();
        let red = world.get_ship("red-01").unwrap();
        assert!(!visual.is_contact(own, red, now));
    }

    #[test]
    fn test_deep_observer_sees_nothing() {
        let world = surface_world(1000.0, 1.0, 100.0);
        let mut visual = VisualDetection::new();
        let mut rng = StdRng::seed_from_u64(1);
        let now = run_scans(&mut visual, &world, 20, &mut rng);
        let own = world.get_ship("ownship").unwrap();
        let red = world.get_ship("red-01").unwrap();
        assert!(!visual.is_contact(own, red, now));
    }

    #[test]
    fn test_out_of_range_target_not_spotted() {
        let world = surface_world(20_000.0, 1.0, 0.0);
        let mut visual = VisualDetection::new();
        let mut rng = StdRng::seed_from_u64(1);
        let now = run_scans(&mut visual, &world, 20, &mut rng);
        let own = world.get_ship("ownship").unwrap();
        let red = world.get_ship("red-01").unwrap();
        assert!(!visual.is_contact(own, red, now));
    }

    #[test]
    fn test_forced_detection_always_hits() {
        // Far target, tiny natural probability
        let world = surface_world(14_500.0, 1.0, 0.0);
        let mut visual = VisualDetection::new();
        visual.force_player = true;
        let mut rng = StdRng::seed_from_u64(1);
        let now = run_scans(&mut visual, &world, 1, &mut rng);
        let own = world.get_ship("ownship").unwrap();
        let red = world.get_ship("red-01").unwrap();
        assert!(visual.is_contact(own, red, now));
    }

    #[test]
    fn test_carryover_expires() {
        let world = surface_world(1000.0, 1.0, 0.0);
        let mut visual = VisualDetection::new();
        visual.force_player = true;
        let mut rng = StdRng::seed_from_u64(1);
        let now = run_scans(&mut visual, &world, 1, &mut rng);
        let own = world.get_ship("ownship").unwrap();
        let red = world.get_ship("red-01").unwrap();
        assert!(visual.is_contact(own, red, now));
        // Well past the 30 s carry-over, no rescans
        assert!(!visual.is_contact(own, red, now + CARRYOVER_S + 1.0));
    }

    #[test]
    fn test_memory_counts_accumulate() {
        let world = surface_world(2000.0, 1.0, 0.0);
        let mut visual = VisualDetection::new();
        visual.force_player = true;
        let mut rng = StdRng::seed_from_u64(1);
        run_scans(&mut visual, &world, 3, &mut rng);
        let entry = visual.entry("ownship", "red-01").unwrap();
        assert_eq!(entry.detection_count, 3);
        assert!(entry.last_confidence > 0.0);
    }
}

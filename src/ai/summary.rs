//! Information-bounded summaries for the AI agents
//!
//! Everything an engine sees is assembled here, exclusively from
//! sanctioned sensor outputs (passive bearings, visual sightings) and
//! mission metadata. Ground-truth positions of the opposing side never
//! cross this boundary. Floats are rounded to one decimal to keep
//! prompts compact.

use rand::rngs::StdRng;
use regex::Regex;
use serde_json::{Value, json};

use crate::assets::MissionBrief;
use crate::models::{ContactEvent, Ship, Side, TubeState};
use crate::sim::physics::bearing_to_deg;
use crate::sim::sonar::passive_contacts;
use crate::sim::visual::VisualDetection;
use crate::world::World;

/// Round every float in a JSON tree to `ndigits` decimals
pub fn round_floats(value: &Value, ndigits: u32) -> Value {
    let factor = 10f64.powi(ndigits as i32);
    match value {
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if n.is_f64() {
                    let rounded = (f * factor).round() / factor;
                    return serde_json::Number::from_f64(rounded)
                        .map(Value::Number)
                        .unwrap_or_else(|| value.clone());
                }
            }
            value.clone()
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| round_floats(v, ndigits)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), round_floats(v, ndigits)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Fleet-level projection of one RED ship (own-side truth is allowed)
pub fn fleet_ship_projection(ship: &Ship) -> Value {
    let tubes_ready = ship
        .weapons
        .tubes
        .iter()
        .filter(|t| matches!(t.state, TubeState::DoorsOpen { .. }))
        .count();
    json!({
        "id": ship.id,
        "class": ship.ship_class,
        "pos": [ship.kin.x, ship.kin.y],
        "depth": ship.kin.depth,
        "heading": ship.kin.heading,
        "speed": ship.kin.speed,
        "health": {"hull": ship.damage.hull},
        "weapons": {
            "tubes_ready": tubes_ready,
            "ammo": {"torpedo": ship.weapons.torpedoes_stored, "depth_charge": ship.weapons.depth_charges_stored},
        },
        "detectability": {"noise": ship.acoustics.last_detectability},
        "sensors": {"passive_ok": ship.systems.sonar_ok, "has_active": ship.capabilities.has_active_sonar},
        "capabilities": ship.capabilities,
        "constraints": {
            "maxSpeed": ship.hull.max_speed,
            "maxDepth": ship.hull.max_depth,
            "turnRate": ship.hull.turn_rate_max,
        },
    })
}

/// Sensor-only contact picture as seen by the RED side.
///
/// Passive contacts are bearing-only; visual sightings add an estimated
/// range and position. Returns the fused belief plus the raw history
/// events for the fleet contact log.
pub fn red_contact_picture(
    world: &World,
    visual: &VisualDetection,
    now_s: f64,
    rng: &mut StdRng,
) -> (Vec<Value>, Vec<ContactEvent>) {
    let mut merged: std::collections::BTreeMap<String, Value> = Default::default();
    let mut history = Vec::new();
    let blue_ships: Vec<&Ship> = world.ships_on_side(Side::Blue).collect();
    for red in world.ships_on_side(Side::Red) {
        let scan = passive_contacts(red, &blue_ships, rng);
        for contact in &scan.contacts {
            merged.insert(
                contact.id.clone(),
                json!({
                    "id": contact.id,
                    "side": "BLUE",
                    "bearing": contact.bearing,
                    "confidence": contact.confidence,
                    "class": contact.classified_as,
                    "detectability": contact.detectability,
                    "last_seen_s": now_s,
                }),
            );
            history.push(ContactEvent {
                at_s: now_s,
                reported_by: red.id.clone(),
                reporter_pos: [red.kin.x, red.kin.y],
                sensor: "passive".to_string(),
                contact_id: contact.id.clone(),
                bearing: contact.bearing,
                range_est: None,
                est_pos: None,
                confidence: contact.confidence,
                classified_as: contact.classified_as.clone(),
            });
        }
        for blue in &blue_ships {
            if !visual.is_contact(red, blue, now_s) {
                continue;
            }
            let range = red.kin.range_to(&blue.kin);
            let bearing = bearing_to_deg(red.kin.x, red.kin.y, blue.kin.x, blue.kin.y);
            let confidence = visual
                .entry(&red.id, &blue.id)
                .map(|e| e.last_confidence)
                .unwrap_or(0.7);
            let heading_rad = bearing.to_radians();
            let est_pos = [
                red.kin.x + heading_rad.sin() * range,
                red.kin.y + heading_rad.cos() * range,
            ];
            merged.insert(
                blue.id.clone(),
                json!({
                    "id": blue.id,
                    "side": "BLUE",
                    "bearing": bearing,
                    "range_est": range,
                    "confidence": confidence,
                    "class": blue.ship_class,
                    "detectability": 1.0,
                    "last_seen_s": now_s,
                    "visual_mode": VisualDetection::mode_for(red),
                }),
            );
            history.push(ContactEvent {
                at_s: now_s,
                reported_by: red.id.clone(),
                reporter_pos: [red.kin.x, red.kin.y],
                sensor: "visual".to_string(),
                contact_id: blue.id.clone(),
                bearing,
                range_est: Some(range),
                est_pos: Some(est_pos),
                confidence,
                classified_as: format!("{:?}", blue.ship_class),
            });
        }
    }
    (merged.into_values().collect(), history)
}

/// Mission block passed through to the fleet commander
pub fn mission_block(brief: &MissionBrief, world: &World) -> Value {
    let convoy: Vec<Value> = world
        .ships_on_side(Side::Red)
        .map(|s| json!({"id": s.id, "class": s.ship_class}))
        .collect();
    json!({
        "objective": brief.objective,
        "mission_summary": brief.red_mission_summary,
        "red_mission_summary": brief.red_mission_summary,
        "blue_mission_summary": brief.blue_mission_summary,
        "convoy": convoy,
        "target_wp": brief.target_wp,
        "side_objectives": brief.side_objectives,
        "emcon": brief.emcon,
        "speed_limits": brief.speed_limits,
        "success_criteria": brief.success_criteria,
        "ship_behaviors": brief.ship_behaviors,
    })
}

/// Local contacts for one RED ship: its own passive picture plus its
/// visual sightings (which add range).
pub fn ship_local_contacts(
    ship: &Ship,
    world: &World,
    visual: &VisualDetection,
    now_s: f64,
    rng: &mut StdRng,
) -> Vec<Value> {
    let others: Vec<&Ship> = world
        .all_ships()
        .filter(|s| s.id != ship.id && s.side != ship.side)
        .collect();
    let mut by_id: std::collections::BTreeMap<String, Value> = Default::default();
    for contact in passive_contacts(ship, &others, rng).contacts {
        by_id.insert(
            contact.id.clone(),
            json!({
                "id": contact.id,
                "side": "BLUE",
                "bearing": contact.bearing,
                "class": contact.classified_as,
                "confidence": contact.confidence,
                "detectability": contact.detectability,
            }),
        );
    }
    for other in &others {
        if !visual.is_contact(ship, other, now_s) {
            continue;
        }
        let range = ship.kin.range_to(&other.kin);
        let bearing = bearing_to_deg(ship.kin.x, ship.kin.y, other.kin.x, other.kin.y);
        let confidence = visual
            .entry(&ship.id, &other.id)
            .map(|e| e.last_confidence)
            .unwrap_or(0.7);
        by_id.insert(
            other.id.clone(),
            json!({
                "id": other.id,
                "side": "BLUE",
                "bearing": bearing,
                "range_est": range,
                "class": other.ship_class,
                "confidence": confidence,
                "detectability": 1.0,
            }),
        );
    }
    by_id.into_values().collect()
}

/// Bearing/range hints derived from `[x, y]` coordinates embedded in
/// FleetIntent notes, so a ship can act on shared intel.
pub fn fleet_fused_contacts(ship: &Ship, notes: &[crate::models::IntentNote]) -> Vec<Value> {
    let coord_re = Regex::new(r"\[\s*(-?\d+(?:\.\d+)?)\s*,\s*(-?\d+(?:\.\d+)?)\s*\]")
        .expect("static regex");
    let mut fused = Vec::new();
    for note in notes {
        let Some(caps) = coord_re.captures(&note.text) else {
            continue;
        };
        let (Ok(ex), Ok(ey)) = (caps[1].parse::<f64>(), caps[2].parse::<f64>()) else {
            continue;
        };
        let range = ship.kin.range_to_point(ex, ey);
        let bearing = bearing_to_deg(ship.kin.x, ship.kin.y, ex, ey);
        fused.push(json!({
            "bearing": bearing,
            "range_est": range,
            "pos_est": [ex, ey],
            "source": "fleet_note",
            "text": note.text,
        }));
    }
    fused
}

/// Per-ship `self`/`constraints`/`weapons`/`capabilities`/`sensors`
/// blocks of the ship summary
pub fn ship_self_blocks(ship: &Ship) -> Value {
    let tubes: Vec<Value> = ship
        .weapons
        .tubes
        .iter()
        .map(|t| json!({"idx": t.idx, "state": t.state.name()}))
        .collect();
    json!({
        "self": {
            "id": ship.id,
            "class": ship.ship_class,
            "pos": [ship.kin.x, ship.kin.y],
            "depth": ship.kin.depth,
            "heading": ship.kin.heading,
            "speed": ship.kin.speed,
        },
        "constraints": {
            "maxSpeed": ship.hull.max_speed,
            "maxDepth": ship.hull.max_depth,
            "turnRate": ship.hull.turn_rate_max,
        },
        "weapons": {
            "tubes": tubes,
            "torpedoes_stored": ship.weapons.torpedoes_stored,
            "depth_charges_stored": ship.weapons.depth_charges_stored,
            "has_countermeasures": !ship.capabilities.countermeasures.is_empty(),
        },
        "capabilities": {
            "can_set_nav": ship.capabilities.can_set_nav,
            "has_active_sonar": ship.capabilities.has_active_sonar,
            "has_torpedoes": ship.capabilities.has_torpedoes,
            "has_guns": ship.capabilities.has_guns,
            "has_depth_charges": ship.capabilities.has_depth_charges,
        },
        "sensors": {
            "passive_ok": ship.systems.sonar_ok,
            "has_active": ship.capabilities.has_active_sonar,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{builtin_catalog, spawn_ship};
    use crate::models::{IntentNote, Kinematics};
    use rand::SeedableRng;

    fn red_ship(x: f64, y: f64) -> Ship {
        let catalog = builtin_catalog();
        spawn_ship(
            &catalog["SSN"],
            "red-01",
            Side::Red,
            Kinematics {
                x,
                y,
                depth: 100.0,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_round_floats_one_decimal() {
        let value = json!({"a": 1.2345, "b": [2.718, {"c": 3.14159}], "d": 7, "e": "x"});
        let rounded = round_floats(&value, 1);
        assert_eq!(rounded["a"], 1.2);
        assert_eq!(rounded["b"][0], 2.7);
        assert_eq!(rounded["b"][1]["c"], 3.1);
        assert_eq!(rounded["d"], 7);
        assert_eq!(rounded["e"], "x");
    }

    #[test]
    fn test_fleet_fused_contacts_extracts_coordinates() {
        let ship = red_ship(0.0, 0.0);
        let notes = vec![
            IntentNote {
                ship_id: None,
                text: "Bearings converge: possible sub at [1000, 0], heading ~200".to_string(),
            },
            IntentNote {
                ship_id: None,
                text: "No coordinates here".to_string(),
            },
        ];
        let fused = fleet_fused_contacts(&ship, &notes);
        assert_eq!(fused.len(), 1);
        assert!((fused[0]["bearing"].as_f64().unwrap() - 90.0).abs() < 1e-6);
        assert!((fused[0]["range_est"].as_f64().unwrap() - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_enemy_belief_is_sensor_derived_only() {
        let catalog = builtin_catalog();
        let mut world = World::new();
        // BLUE ship astern-proof: place east of red, red heading east
        let mut red = red_ship(0.0, 0.0);
        red.kin.heading = 90.0;
        red.acoustics.thermocline_on = false;
        world.add_ship(red);
        world.add_ship(spawn_ship(
            &catalog["SSN"],
            "ownship",
            Side::Blue,
            Kinematics {
                // Close enough that the passive return clears the gate
                x: 300.0,
                depth: 100.0,
                speed: 10.0,
                ..Default::default()
            },
        ));
        let visual = VisualDetection::new();
        let mut rng = StdRng::seed_from_u64(21);
        let (belief, history) = red_contact_picture(&world, &visual, 10.0, &mut rng);
        assert_eq!(belief.len(), 1);
        // Passive: bearing present, no range
        assert!(belief[0].get("bearing").is_some());
        assert!(belief[0].get("range_est").is_none());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sensor, "passive");
        assert!(history[0].range_est.is_none());
    }

    #[test]
    fn test_ship_blocks_shape() {
        let ship = red_ship(0.0, 0.0);
        let blocks = ship_self_blocks(&ship);
        assert_eq!(blocks["self"]["id"], "red-01");
        assert_eq!(blocks["capabilities"]["has_torpedoes"], true);
        assert_eq!(blocks["weapons"]["tubes"].as_array().unwrap().len(), 6);
    }
}

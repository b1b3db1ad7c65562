//! Mission and ship catalog assets
//!
//! Loads the per-class ship catalog and mission documents (JSON) from
//! the data directory and applies them to the world. Built-in defaults
//! cover the standard classes and the default patrol mission so the
//! simulation runs with no assets on disk.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::models::{
    Acoustics, DamageState, Hull, Kinematics, MaintenanceState, PowerAllocations, Reactor, Ship,
    ShipCapabilities, ShipClass, Side, SystemsStatus, WeaponsSuite,
};
use crate::world::World;

/// Per-class defaults applied when a ship spawns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipDef {
    pub name: String,
    pub ship_class: ShipClass,
    pub capabilities: ShipCapabilities,
    #[serde(default)]
    pub hull: Hull,
    #[serde(default)]
    pub weapons: WeaponsSuite,
    #[serde(default)]
    pub acoustics: Acoustics,
}

/// Catalog of ship classes keyed by class name
pub type ShipCatalog = HashMap<String, ShipDef>;

/// Built-in catalog used when no catalog document is present.
///
/// The Destroyer carries depth charges but no torpedo tubes; convoy
/// vessels are unarmed and loud.
pub fn builtin_catalog() -> ShipCatalog {
    let mut catalog = ShipCatalog::new();
    catalog.insert(
        "SSN".to_string(),
        ShipDef {
            name: "Nuclear Attack Submarine".to_string(),
            ship_class: ShipClass::Ssn,
            capabilities: ShipCapabilities {
                can_set_nav: true,
                has_active_sonar: true,
                has_torpedoes: true,
                has_guns: false,
                has_depth_charges: false,
                countermeasures: vec!["noisemaker".to_string(), "decoy".to_string()],
            },
            hull: Hull {
                max_depth: 300.0,
                max_speed: 30.0,
                quiet_speed: 5.0,
                ..Hull::default()
            },
            weapons: WeaponsSuite::default(),
            acoustics: Acoustics::default(),
        },
    );
    catalog.insert(
        "Convoy".to_string(),
        ShipDef {
            name: "Convoy Cargo Vessel".to_string(),
            ship_class: ShipClass::Convoy,
            capabilities: ShipCapabilities {
                can_set_nav: true,
                has_active_sonar: false,
                has_torpedoes: false,
                has_guns: false,
                has_depth_charges: false,
                countermeasures: Vec::new(),
            },
            hull: Hull {
                max_depth: 20.0,
                max_speed: 20.0,
                quiet_speed: 5.0,
                ..Hull::default()
            },
            weapons: WeaponsSuite::unarmed(),
            acoustics: Acoustics {
                thermocline_on: false,
                source_level_by_speed: vec![(5.0, 120.0), (10.0, 130.0), (15.0, 140.0)],
                ..Acoustics::default()
            },
        },
    );
    catalog.insert(
        "Destroyer".to_string(),
        ShipDef {
            name: "Destroyer (ASW)".to_string(),
            ship_class: ShipClass::Destroyer,
            capabilities: ShipCapabilities {
                can_set_nav: true,
                has_active_sonar: true,
                has_torpedoes: false,
                has_guns: true,
                has_depth_charges: true,
                countermeasures: Vec::new(),
            },
            hull: Hull {
                max_depth: 50.0,
                max_speed: 32.0,
                quiet_speed: 8.0,
                ..Hull::default()
            },
            weapons: WeaponsSuite {
                depth_charges_stored: 30,
                ..WeaponsSuite::unarmed()
            },
            acoustics: Acoustics {
                thermocline_on: false,
                source_level_by_speed: vec![(5.0, 125.0), (15.0, 140.0), (25.0, 150.0)],
                ..Acoustics::default()
            },
        },
    );
    catalog
}

/// Load a catalog document, merging over the built-in defaults.
///
/// Entries that fail to parse are skipped with a warning. Destroyer
/// entries are normalized to depth charges without torpedoes regardless
/// of what the document claims.
pub fn load_catalog(path: &Path) -> ShipCatalog {
    let mut catalog = builtin_catalog();
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => {
            info!("No ship catalog at {}, using built-ins", path.display());
            return catalog;
        }
    };
    let doc: Value = match serde_json::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Ship catalog {} unreadable: {}", path.display(), e);
            return catalog;
        }
    };
    let Some(entries) = doc.as_object() else {
        warn!("Ship catalog {} is not an object", path.display());
        return catalog;
    };
    let mut loaded = 0usize;
    for (key, entry) in entries {
        match serde_json::from_value::<ShipDef>(entry.clone()) {
            Ok(mut def) => {
                if def.ship_class == ShipClass::Destroyer {
                    def.capabilities.has_torpedoes = false;
                    def.capabilities.has_depth_charges = true;
                }
                catalog.insert(key.clone(), def);
                loaded += 1;
            }
            Err(e) => warn!("Skipping catalog entry '{}': {}", key, e),
        }
    }
    info!("Loaded {} ship definitions from catalog", loaded);
    catalog
}

/// A ship spawn inside a mission document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionShipSpawn {
    pub id: String,
    pub side: Side,
    #[serde(rename = "class")]
    pub class_name: String,
    #[serde(default)]
    pub spawn: BTreeMap<String, f64>,
}

/// A scheduled flash-traffic message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommsScheduleEntry {
    pub at_s: f64,
    pub msg: String,
}

/// A mission document as loaded from disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionConfig {
    pub id: String,
    pub title: String,
    pub objective: String,
    #[serde(default)]
    pub roe: Vec<String>,
    #[serde(default)]
    pub target_wp: Option<[f64; 2]>,
    pub ships: Vec<MissionShipSpawn>,
    #[serde(default)]
    pub blue_captain_summary: Option<String>,
    #[serde(default)]
    pub red_mission_summary: Option<String>,
    #[serde(default)]
    pub blue_mission_summary: Option<String>,
    #[serde(default)]
    pub side_objectives: BTreeMap<String, Value>,
    #[serde(default)]
    pub success_criteria: BTreeMap<String, Value>,
    #[serde(default)]
    pub emcon: BTreeMap<String, Value>,
    #[serde(default)]
    pub speed_limits: BTreeMap<String, Value>,
    /// Per-ship behavior instructions passed to the ship agents
    #[serde(default)]
    pub ship_behaviors: BTreeMap<String, String>,
    #[serde(default)]
    pub comms_schedule: Vec<CommsScheduleEntry>,
}

/// The mission data the captain frame and the AI summaries consume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissionBrief {
    pub title: String,
    pub objective: String,
    pub roe: Vec<String>,
    pub target_wp: Option<[f64; 2]>,
    pub blue_captain_summary: Option<String>,
    pub red_mission_summary: Option<String>,
    pub blue_mission_summary: Option<String>,
    pub side_objectives: BTreeMap<String, Value>,
    pub success_criteria: BTreeMap<String, Value>,
    pub emcon: BTreeMap<String, Value>,
    pub speed_limits: BTreeMap<String, Value>,
    pub ship_behaviors: BTreeMap<String, String>,
    pub comms_schedule: Vec<CommsScheduleEntry>,
}

impl MissionBrief {
    pub fn from_mission(mission: &MissionConfig) -> Self {
        Self {
            title: mission.title.clone(),
            objective: mission.objective.clone(),
            roe: mission.roe.clone(),
            target_wp: mission.target_wp,
            blue_captain_summary: mission.blue_captain_summary.clone(),
            red_mission_summary: mission.red_mission_summary.clone(),
            blue_mission_summary: mission.blue_mission_summary.clone(),
            side_objectives: mission.side_objectives.clone(),
            success_criteria: mission.success_criteria.clone(),
            emcon: mission.emcon.clone(),
            speed_limits: mission.speed_limits.clone(),
            ship_behaviors: mission.ship_behaviors.clone(),
            comms_schedule: mission.comms_schedule.clone(),
        }
    }

    /// The default patrol tasking used when no mission is loaded
    pub fn default_patrol() -> Self {
        Self {
            title: "Patrol Box KILO-7".to_string(),
            objective:
                "Shadow contact RED-01, maintain undetected posture, do not fire unless fired upon."
                    .to_string(),
            roe: vec![
                "Weapons free upon hostile engagement or direct order.".to_string(),
                "Avoid active sonar unless necessary for navigation or identification.".to_string(),
                "Maintain EMCON; minimize mast raises.".to_string(),
            ],
            comms_schedule: vec![
                CommsScheduleEntry {
                    at_s: 120.0,
                    msg: "FLASH: New tasking window opens at 18:00Z. Await further instructions."
                        .to_string(),
                },
                CommsScheduleEntry {
                    at_s: 300.0,
                    msg: "INFO: Intel suggests RED-01 may alter course east within 10 minutes."
                        .to_string(),
                },
            ],
            ..Self::default()
        }
    }

    /// The single-surface-contact training tasking (debug mission)
    pub fn surface_vessel_training() -> Self {
        Self {
            title: "Surface Vessel Intercept (Training)".to_string(),
            objective:
                "Approach undetected, classify, and conduct a training torpedo shot on a single surface contact."
                    .to_string(),
            roe: vec![
                "Weapons release authorized for training shot.".to_string(),
                "Minimize active sonar to preserve EMCON.".to_string(),
            ],
            comms_schedule: vec![CommsScheduleEntry {
                at_s: 90.0,
                msg: "INFO: Surface contact maintaining 5 kn on easterly course.".to_string(),
            }],
            ..Self::default()
        }
    }
}

/// Load a mission by id from `<missions_dir>/<id>.json`
pub fn load_mission(missions_dir: &Path, mission_id: &str) -> Result<MissionConfig, String> {
    let path = missions_dir.join(format!("{}.json", mission_id));
    let raw = fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read mission {}: {}", path.display(), e))?;
    serde_json::from_str(&raw)
        .map_err(|e| format!("Failed to parse mission {}: {}", path.display(), e))
}

/// Build a ship from catalog defaults
pub fn spawn_ship(def: &ShipDef, id: &str, side: Side, kin: Kinematics) -> Ship {
    Ship {
        id: id.to_string(),
        side,
        ship_class: def.ship_class,
        kin,
        hull: def.hull.clone(),
        acoustics: def.acoustics.clone(),
        weapons: def.weapons.clone(),
        reactor: Reactor {
            output_mw: 50.0,
            max_mw: 100.0,
            ..Reactor::default()
        },
        damage: DamageState::default(),
        power: PowerAllocations::default(),
        systems: SystemsStatus::default(),
        maintenance: MaintenanceState::default(),
        capabilities: def.capabilities.clone(),
    }
}

/// Reset the world to a mission's spawn list; unknown classes are
/// skipped with a warning. Returns the mission brief for the captain
/// frame and the AI summaries.
pub fn apply_mission_to_world(
    mission: &MissionConfig,
    world: &mut World,
    catalog: &ShipCatalog,
) -> MissionBrief {
    world.clear();
    for spawn in &mission.ships {
        let Some(def) = catalog.get(&spawn.class_name) else {
            warn!(
                "Mission {} spawns unknown class '{}' for {}",
                mission.id, spawn.class_name, spawn.id
            );
            continue;
        };
        let kin = Kinematics {
            x: spawn.spawn.get("x").copied().unwrap_or(0.0),
            y: spawn.spawn.get("y").copied().unwrap_or(0.0),
            depth: spawn.spawn.get("depth").copied().unwrap_or(0.0),
            heading: spawn.spawn.get("heading").copied().unwrap_or(0.0),
            speed: spawn.spawn.get("speed").copied().unwrap_or(0.0),
            ..Kinematics::default()
        };
        world.add_ship(spawn_ship(def, &spawn.id, spawn.side, kin));
    }
    MissionBrief::from_mission(mission)
}

/// Seed the default two-ship world: ownship versus one RED submarine.
pub fn default_world(world: &mut World, catalog: &ShipCatalog) -> MissionBrief {
    world.clear();
    let ssn = catalog
        .get("SSN")
        .cloned()
        .unwrap_or_else(|| builtin_catalog().remove("SSN").expect("builtin SSN"));
    world.add_ship(spawn_ship(
        &ssn,
        "ownship",
        Side::Blue,
        Kinematics {
            depth: 100.0,
            heading: 270.0,
            speed: 8.0,
            ..Kinematics::default()
        },
    ));
    let mut red = spawn_ship(
        &ssn,
        "red-01",
        Side::Red,
        Kinematics {
            x: 3000.0,
            y: 0.0,
            depth: 120.0,
            heading: 90.0,
            speed: 8.0,
            ..Kinematics::default()
        },
    );
    red.hull.max_speed = 28.0;
    world.add_ship(red);
    MissionBrief::default_patrol()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_classes() {
        let catalog = builtin_catalog();
        assert!(catalog.contains_key("SSN"));
        assert!(catalog.contains_key("Convoy"));
        assert!(catalog.contains_key("Destroyer"));

        let destroyer = &catalog["Destroyer"];
        assert!(!destroyer.capabilities.has_torpedoes);
        assert!(destroyer.capabilities.has_depth_charges);
        assert_eq!(destroyer.weapons.depth_charges_stored, 30);

        let convoy = &catalog["Convoy"];
        assert!(convoy.weapons.tubes.is_empty());
        assert!(!convoy.capabilities.has_active_sonar);
    }

    #[test]
    fn test_default_world_spawns_two_ships() {
        let mut world = World::new();
        let brief = default_world(&mut world, &builtin_catalog());
        assert_eq!(world.ship_count(), 2);
        assert_eq!(brief.title, "Patrol Box KILO-7");

        let own = world.get_ship("ownship").unwrap();
        assert_eq!(own.kin.heading, 270.0);
        assert_eq!(own.kin.depth, 100.0);
        let red = world.get_ship("red-01").unwrap();
        assert_eq!(red.kin.x, 3000.0);
        assert_eq!(red.hull.max_speed, 28.0);
    }

    #[test]
    fn test_apply_mission_skips_unknown_class() {
        let mission = MissionConfig {
            id: "m1".to_string(),
            title: "Test".to_string(),
            objective: "Test".to_string(),
            roe: Vec::new(),
            target_wp: Some([5000.0, 0.0]),
            ships: vec![
                MissionShipSpawn {
                    id: "dd-01".to_string(),
                    side: Side::Red,
                    class_name: "Destroyer".to_string(),
                    spawn: BTreeMap::from([("x".to_string(), 1000.0)]),
                },
                MissionShipSpawn {
                    id: "ufo-01".to_string(),
                    side: Side::Red,
                    class_name: "Zeppelin".to_string(),
                    spawn: BTreeMap::new(),
                },
            ],
            blue_captain_summary: None,
            red_mission_summary: None,
            blue_mission_summary: None,
            side_objectives: BTreeMap::new(),
            success_criteria: BTreeMap::new(),
            emcon: BTreeMap::new(),
            speed_limits: BTreeMap::new(),
            ship_behaviors: BTreeMap::new(),
            comms_schedule: Vec::new(),
        };
        let mut world = World::new();
        let brief = apply_mission_to_world(&mission, &mut world, &builtin_catalog());
        assert_eq!(world.ship_count(), 1);
        assert!(world.get_ship("dd-01").is_some());
        assert_eq!(brief.target_wp, Some([5000.0, 0.0]));
    }
}

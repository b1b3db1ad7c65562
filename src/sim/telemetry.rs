//! Telemetry framer
//!
//! Builds one JSON frame per station topic per tick. Every frame shares
//! a base payload (ownship pose and orders, acoustics summary, station
//! noise, transient events); each station adds its own view. The debug
//! frame alone carries authoritative world truth.

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::VecDeque;

use crate::ai::orchestrator::RunRecord;
use crate::assets::MissionBrief;
use crate::events::EventQueue;
use crate::models::{
    FleetIntent, PingResponse, Ship, SonarContact, SyntheticContact, Tube,
};
use crate::sim::noise::StationLevels;
use crate::sim::physics::{bearing_to_deg, normalize_deg};
use crate::sim::tasks::TaskBoard;
use crate::world::World;

/// Periscope observation range (m) and target depth ceiling (m)
pub const PERISCOPE_RANGE_M: f64 = 15_000.0;
pub const PERISCOPE_TARGET_DEPTH_M: f64 = 5.0;
/// Ownship depth at which the periscope and radio masts clear the water
pub const MAST_DEPTH_M: f64 = 20.0;

/// A delivered captain comms message
#[derive(Debug, Clone, Serialize)]
pub struct CommsMessage {
    pub at_s: f64,
    pub text: String,
}

/// Ordered helm setpoints
#[derive(Debug, Clone, Copy)]
pub struct NavSetpoints {
    pub heading: f64,
    pub speed: f64,
    pub depth: f64,
}

/// Everything the framer needs for one tick's frames
pub struct FrameContext<'a> {
    pub world: &'a World,
    pub own_id: &'a str,
    pub ordered: NavSetpoints,
    pub cavitation: bool,
    pub noise: &'a StationLevels,
    pub noise_budget: f64,
    pub detectability: f64,
    pub emcon_alert: bool,
    pub events: &'a EventQueue,
    pub contacts: &'a [SonarContact],
    pub synthetic_contacts: &'a [SyntheticContact],
    pub ping_responses: &'a [PingResponse],
    pub ping_cooldown_s: f64,
    pub last_ping_at_s: Option<f64>,
    pub periscope_raised: bool,
    pub radio_raised: bool,
    pub pump_fwd: bool,
    pub pump_aft: bool,
    pub captain_consent: bool,
    pub require_captain_consent: bool,
    pub mission: &'a MissionBrief,
    pub comms: &'a [CommsMessage],
    pub tasks: &'a TaskBoard,
    pub intent: &'a FleetIntent,
    pub recent_runs: &'a VecDeque<RunRecord>,
    pub ai_enabled: bool,
    pub maintenance_spawns_enabled: bool,
    pub visual_force_player: bool,
    pub visual_force_enemy: bool,
    pub sim_time_s: f64,
}

impl<'a> FrameContext<'a> {
    fn own(&self) -> &Ship {
        self.world
            .get_ship(self.own_id)
            .expect("ownship exists for the life of the session")
    }

    /// Base payload shared by every station frame
    pub fn base(&self) -> Value {
        let own = self.own();
        let emcon_risk = if self.noise_budget >= 75.0 {
            "high"
        } else if self.noise_budget >= 40.0 {
            "med"
        } else {
            "low"
        };
        json!({
            "time_s": self.sim_time_s,
            "ownship": {
                "heading": own.kin.heading,
                "speed": own.kin.speed,
                "depth": own.kin.depth,
                "orderedHeading": self.ordered.heading,
                "orderedSpeed": self.ordered.speed,
                "orderedDepth": self.ordered.depth,
                "cavitation": self.cavitation,
            },
            "acoustics": {
                "noiseBudget": self.noise_budget,
                "detectability": self.detectability,
                "emconRisk": emcon_risk,
                "emconAlert": self.emcon_alert,
            },
            "noise": {
                "helm": self.noise.helm,
                "sonar": self.noise.sonar,
                "weapons": self.noise.weapons,
                "engineering": self.noise.engineering,
                "total": self.noise.total,
            },
            "events": self.events.iter().collect::<Vec<_>>(),
        })
    }

    fn with_base(&self, extra: Value) -> Value {
        let mut frame = self.base();
        if let (Some(obj), Some(extra)) = (frame.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        frame
    }

    /// `tick:all` — shared overview with coarse ship states
    pub fn frame_all(&self) -> Value {
        let ships: Vec<Value> = self
            .world
            .all_ships()
            .map(|s| {
                json!({
                    "id": s.id,
                    "side": s.side,
                    "class": s.ship_class,
                    "x": s.kin.x,
                    "y": s.kin.y,
                    "depth": s.kin.depth,
                    "heading": s.kin.heading,
                    "speed": s.kin.speed,
                    "capabilities": s.capabilities,
                })
            })
            .collect();
        self.with_base(json!({"ships": ships}))
    }

    /// Precise periscope contacts for shallow targets while the scope is
    /// up and ownship is at mast depth.
    pub fn periscope_contacts(&self) -> Vec<Value> {
        let own = self.own();
        if !self.periscope_raised || own.kin.depth > MAST_DEPTH_M {
            return Vec::new();
        }
        self.world
            .all_ships()
            .filter(|s| s.id != own.id && s.kin.depth <= PERISCOPE_TARGET_DEPTH_M)
            .filter_map(|s| {
                let range = own.kin.range_to(&s.kin);
                if range > PERISCOPE_RANGE_M {
                    return None;
                }
                let bearing = bearing_to_deg(own.kin.x, own.kin.y, s.kin.x, s.kin.y);
                Some(json!({
                    "id": s.id,
                    "bearing": bearing,
                    "range_m": range,
                    "speed_kn": s.kin.speed,
                    "type": format!("{:?} vessel", s.side),
                }))
            })
            .collect()
    }

    /// `tick:captain`
    pub fn frame_captain(&self) -> Value {
        let own = self.own();
        let statuses = json!({
            "helm": self.tasks.station_status(crate::models::Station::Helm, own.systems.rudder_ok),
            "sonar": self.tasks.station_status(crate::models::Station::Sonar, own.systems.sonar_ok),
            "weapons": self.tasks.station_status(crate::models::Station::Weapons, own.systems.tubes_ok),
            "engineering": self.tasks.station_status(crate::models::Station::Engineering, own.systems.ballast_ok),
        });
        self.with_base(json!({
            "periscopeRaised": self.periscope_raised,
            "radioRaised": self.radio_raised,
            "mission": {
                "title": self.mission.title,
                "objective": self.mission.objective,
                "roe": self.mission.roe,
                "summary": self.mission.blue_captain_summary,
            },
            "comms": self.comms,
            "stationStatus": statuses,
            "periscopeContacts": self.periscope_contacts(),
        }))
    }

    /// `tick:helm`
    pub fn frame_helm(&self) -> Value {
        let own = self.own();
        self.with_base(json!({
            "cavitationSpeedWarn": own.kin.speed > 25.0,
            "thermocline": own.acoustics.thermocline_on,
            "tasks": self.tasks.tasks(crate::models::Station::Helm),
        }))
    }

    /// `tick:sonar`
    pub fn frame_sonar(&self) -> Value {
        self.with_base(json!({
            "contacts": self.contacts,
            "syntheticContacts": self.synthetic_contacts,
            "pingResponses": self.ping_responses,
            "pingCooldown": self.ping_cooldown_s.max(0.0),
            "lastPingAt": self.last_ping_at_s,
            "tasks": self.tasks.tasks(crate::models::Station::Sonar),
        }))
    }

    fn tube_json(tube: &Tube) -> Value {
        json!({
            "idx": tube.idx,
            "state": tube.state.name(),
            "weapon": tube.state.weapon().map(|w| w.name.clone()),
            "timer_s": tube.timer_s(),
            "next_state": tube.next_state_name(),
        })
    }

    /// `tick:weapons`
    pub fn frame_weapons(&self) -> Value {
        let own = self.own();
        let tubes: Vec<Value> = own.weapons.tubes.iter().map(Self::tube_json).collect();
        self.with_base(json!({
            "tubes": tubes,
            "torpedoesStored": own.weapons.torpedoes_stored,
            "consentRequired": self.require_captain_consent,
            "captainConsent": self.captain_consent,
            "tasks": self.tasks.tasks(crate::models::Station::Weapons),
        }))
    }

    /// `tick:engineering`
    pub fn frame_engineering(&self) -> Value {
        let own = self.own();
        self.with_base(json!({
            "reactor": own.reactor,
            "pumps": {"fwd": self.pump_fwd, "aft": self.pump_aft},
            "damage": own.damage,
            "power": own.power,
            "systems": own.systems,
            "maintenance": own.maintenance.levels,
            "tasks": self.tasks.tasks(crate::models::Station::Engineering),
        }))
    }

    /// `tick:debug` — authoritative truth, never shown to stations
    pub fn frame_debug(&self) -> Value {
        let own = self.own();
        let ships: Vec<Value> = self
            .world
            .all_ships()
            .filter(|s| s.id != own.id)
            .map(|s| {
                let bearing_true = bearing_to_deg(own.kin.x, own.kin.y, s.kin.x, s.kin.y);
                let bearing_rel = normalize_deg(bearing_true - own.kin.heading);
                json!({
                    "id": s.id,
                    "side": s.side,
                    "class": s.ship_class,
                    "capabilities": s.capabilities,
                    "x": s.kin.x,
                    "y": s.kin.y,
                    "depth": s.kin.depth,
                    "heading": s.kin.heading,
                    "speed": s.kin.speed,
                    "snrDb": s.acoustics.last_snr_db,
                    "passiveDetect": s.acoustics.last_detectability,
                    "bearing_true": bearing_true,
                    "bearing_rel": bearing_rel,
                    "range_from_own": own.kin.range_to(&s.kin),
                })
            })
            .collect();
        json!({
            "time_s": self.sim_time_s,
            "ownship": {
                "x": own.kin.x,
                "y": own.kin.y,
                "depth": own.kin.depth,
                "heading": own.kin.heading,
                "speed": own.kin.speed,
            },
            "ships": ships,
            "torpedoes": self.world.torpedoes,
            "depthCharges": self.world.depth_charges,
            "maintenance": {"spawnsEnabled": self.maintenance_spawns_enabled},
            "visual": {
                "forcePlayer": self.visual_force_player,
                "forceEnemy": self.visual_force_enemy,
            },
        })
    }

    /// `tick:fleet` — current intent plus recent AI runs
    pub fn frame_fleet(&self) -> Value {
        self.with_base(json!({
            "fleetIntent": self.intent,
            "aiEnabled": self.ai_enabled,
            "recentRuns": self.recent_runs.iter().collect::<Vec<_>>(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{MissionBrief, builtin_catalog, default_world};
    use crate::sim::tasks::TaskBoard;

    fn fixture<'a>(
        world: &'a World,
        noise: &'a StationLevels,
        events: &'a EventQueue,
        mission: &'a MissionBrief,
        tasks: &'a TaskBoard,
        intent: &'a FleetIntent,
        runs: &'a VecDeque<RunRecord>,
    ) -> FrameContext<'a> {
        FrameContext {
            world,
            own_id: "ownship",
            ordered: NavSetpoints {
                heading: 270.0,
                speed: 8.0,
                depth: 100.0,
            },
            cavitation: false,
            noise,
            noise_budget: 42.0,
            detectability: 0.42,
            emcon_alert: false,
            events,
            contacts: &[],
            synthetic_contacts: &[],
            ping_responses: &[],
            ping_cooldown_s: 0.0,
            last_ping_at_s: None,
            periscope_raised: false,
            radio_raised: false,
            pump_fwd: false,
            pump_aft: false,
            captain_consent: false,
            require_captain_consent: true,
            mission,
            comms: &[],
            tasks,
            intent,
            recent_runs: runs,
            ai_enabled: false,
            maintenance_spawns_enabled: true,
            visual_force_player: false,
            visual_force_enemy: false,
            sim_time_s: 12.5,
        }
    }

    #[test]
    fn test_base_payload_and_station_frames() {
        let mut world = World::new();
        let mission = default_world(&mut world, &builtin_catalog());
        let noise = StationLevels::default();
        let events = EventQueue::new();
        let tasks = TaskBoard::new(1e9);
        let intent = FleetIntent::default();
        let runs = VecDeque::new();
        let ctx = fixture(&world, &noise, &events, &mission, &tasks, &intent, &runs);

        let base = ctx.base();
        assert_eq!(base["ownship"]["orderedHeading"], 270.0);
        assert_eq!(base["acoustics"]["emconRisk"], "med");

        let all = ctx.frame_all();
        assert_eq!(all["ships"].as_array().unwrap().len(), 2);

        let captain = ctx.frame_captain();
        assert_eq!(captain["mission"]["title"], "Patrol Box KILO-7");
        assert_eq!(captain["stationStatus"]["helm"], "OK");

        let weapons = ctx.frame_weapons();
        assert_eq!(weapons["tubes"].as_array().unwrap().len(), 6);
        assert_eq!(weapons["consentRequired"], true);

        let engineering = ctx.frame_engineering();
        assert!(engineering["reactor"]["output_mw"].is_number());
        assert!(engineering["systems"]["rudder_ok"].as_bool().unwrap());

        let fleet = ctx.frame_fleet();
        assert!(fleet["fleetIntent"]["objectives"].is_object());
    }

    #[test]
    fn test_debug_frame_carries_truth() {
        let mut world = World::new();
        let mission = default_world(&mut world, &builtin_catalog());
        let noise = StationLevels::default();
        let events = EventQueue::new();
        let tasks = TaskBoard::new(1e9);
        let intent = FleetIntent::default();
        let runs = VecDeque::new();
        let ctx = fixture(&world, &noise, &events, &mission, &tasks, &intent, &runs);

        let debug = ctx.frame_debug();
        let ships = debug["ships"].as_array().unwrap();
        assert_eq!(ships.len(), 1);
        // red-01 spawns due east of ownship
        assert_eq!(ships[0]["id"], "red-01");
        assert!((ships[0]["bearing_true"].as_f64().unwrap() - 90.0).abs() < 1e-6);
        assert!((ships[0]["range_from_own"].as_f64().unwrap() - 3000.0).abs() < 1e-6);
    }

    #[test]
    fn test_periscope_contacts_require_scope_and_depth() {
        let mut world = World::new();
        let mission = default_world(&mut world, &builtin_catalog());
        // Put the contact on the surface, ownship at periscope depth
        world.get_ship_mut("red-01").unwrap().kin.depth = 3.0;
        world.get_ship_mut("ownship").unwrap().kin.depth = 15.0;
        let noise = StationLevels::default();
        let events = EventQueue::new();
        let tasks = TaskBoard::new(1e9);
        let intent = FleetIntent::default();
        let runs = VecDeque::new();
        let mut ctx = fixture(&world, &noise, &events, &mission, &tasks, &intent, &runs);

        assert!(ctx.periscope_contacts().is_empty());
        ctx.periscope_raised = true;
        let contacts = ctx.periscope_contacts();
        assert_eq!(contacts.len(), 1);
        assert!((contacts[0]["bearing"].as_f64().unwrap() - 90.0).abs() < 1e-6);
    }
}

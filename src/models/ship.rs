//! Ship models
//!
//! Defines the authoritative per-ship state: kinematics, hull limits,
//! acoustics, the weapons suite with its time-gated tube state machine,
//! reactor and damage state, power allocation, systems status flags,
//! maintenance levels, and platform capabilities.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ordnance::TorpedoDef;

/// Which side of the engagement a platform belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BLUE")]
    Blue,
    #[serde(rename = "RED")]
    Red,
}

impl Side {
    /// The opposing side
    pub fn opponent(self) -> Side {
        match self {
            Side::Blue => Side::Red,
            Side::Red => Side::Blue,
        }
    }
}

/// Platform class, driving catalog defaults and sonar classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipClass {
    #[serde(rename = "SSN")]
    Ssn,
    Convoy,
    Destroyer,
}

/// Position, depth, heading and speed plus derived rates.
///
/// Coordinates are meters with x east and y north; heading is compass
/// degrees (0 = north, 90 = east); speed is knots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Kinematics {
    pub x: f64,
    pub y: f64,
    pub depth: f64,
    pub heading: f64,
    pub speed: f64,
    #[serde(default)]
    pub turn_rate: f64,
    #[serde(default)]
    pub accel: f64,
    #[serde(default)]
    pub depth_rate: f64,
}

impl Kinematics {
    /// Horizontal range in meters to another pose
    pub fn range_to(&self, other: &Kinematics) -> f64 {
        self.range_to_point(other.x, other.y)
    }

    /// Horizontal range in meters to an arbitrary point
    pub fn range_to_point(&self, x: f64, y: f64) -> f64 {
        let dx = x - self.x;
        let dy = y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Hull performance limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Hull {
    pub max_depth: f64,
    pub crush_depth: f64,
    pub max_speed: f64,
    pub quiet_speed: f64,
    pub turn_rate_max: f64,
    pub accel_max: f64,
    pub decel_max: f64,
}

impl Default for Hull {
    fn default() -> Self {
        Self {
            max_depth: 300.0,
            crush_depth: 600.0,
            max_speed: 30.0,
            quiet_speed: 5.0,
            turn_rate_max: 7.0,
            accel_max: 0.5,
            decel_max: 0.7,
        }
    }
}

/// Acoustic signature and accumulated sensor penalties.
///
/// `source_level_by_speed` is a list of `(speed_kn, level_db)` bins; the
/// bin nearest to the target's speed is used by passive sonar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Acoustics {
    pub source_level_by_speed: Vec<(f64, f64)>,
    pub thermocline_on: bool,
    /// Extra sigma injected into passive bearing measurements
    pub bearing_noise_extra: f64,
    pub passive_snr_penalty_db: f64,
    pub hydro_bearing_bias_deg: f64,
    pub active_range_noise_add_m: f64,
    pub active_bearing_noise_extra: f64,
    /// Sustained mast/operation bonus applied when this ship is the target
    pub mast_bonus_db: f64,
    /// Operation-driven broadband level recomputed each tick; 0 when idle
    pub dynamic_source_level_db: f64,
    /// Last SNR computed against this ship as a target (debug/telemetry)
    pub last_snr_db: f64,
    /// Last detectability computed against this ship as a target
    pub last_detectability: f64,
}

impl Default for Acoustics {
    fn default() -> Self {
        Self {
            source_level_by_speed: vec![(5.0, 110.0), (10.0, 118.0), (15.0, 130.0)],
            thermocline_on: true,
            bearing_noise_extra: 0.0,
            passive_snr_penalty_db: 0.0,
            hydro_bearing_bias_deg: 0.0,
            active_range_noise_add_m: 0.0,
            active_bearing_noise_extra: 0.0,
            mast_bonus_db: 0.0,
            dynamic_source_level_db: 0.0,
            last_snr_db: 0.0,
            last_detectability: 0.0,
        }
    }
}

impl Acoustics {
    /// Source level of the bin nearest to `speed_kn`, including any
    /// operation-driven dynamic level.
    pub fn source_level_for_speed(&self, speed_kn: f64) -> f64 {
        let spd = speed_kn.abs();
        let bin = self
            .source_level_by_speed
            .iter()
            .min_by(|a, b| {
                let da = (a.0 - spd).abs();
                let db = (b.0 - spd).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|&(_, level)| level)
            .unwrap_or(110.0);
        bin.max(self.dynamic_source_level_db)
    }
}

/// Per-station power fractions. Invariant: the sum never exceeds 1.0
/// (plus float slack); the allocate command enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerAllocations {
    pub helm: f64,
    pub weapons: f64,
    pub sonar: f64,
    pub engineering: f64,
}

impl Default for PowerAllocations {
    fn default() -> Self {
        Self {
            helm: 0.25,
            weapons: 0.25,
            sonar: 0.25,
            engineering: 0.25,
        }
    }
}

impl PowerAllocations {
    pub fn total(&self) -> f64 {
        self.helm + self.weapons + self.sonar + self.engineering
    }
}

/// Go/no-go flags for ship systems, re-derived from maintenance levels
/// and forced down by failed maintenance tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemsStatus {
    pub rudder_ok: bool,
    pub ballast_ok: bool,
    pub sonar_ok: bool,
    pub radio_ok: bool,
    pub periscope_ok: bool,
    pub tubes_ok: bool,
}

impl Default for SystemsStatus {
    fn default() -> Self {
        Self {
            rudder_ok: true,
            ballast_ok: true,
            sonar_ok: true,
            radio_ok: true,
            periscope_ok: true,
            tubes_ok: true,
        }
    }
}

/// Maintenance levels per system, 0.0 (failed) to 1.0 (fully maintained)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceState {
    pub levels: BTreeMap<String, f64>,
}

impl Default for MaintenanceState {
    fn default() -> Self {
        let mut levels = BTreeMap::new();
        for system in ["rudder", "ballast", "sonar", "radio", "periscope", "tubes"] {
            levels.insert(system.to_string(), 1.0);
        }
        Self { levels }
    }
}

impl MaintenanceState {
    pub fn level(&self, system: &str) -> f64 {
        self.levels.get(system).copied().unwrap_or(1.0)
    }

    pub fn adjust(&mut self, system: &str, delta: f64) {
        let entry = self.levels.entry(system.to_string()).or_insert(1.0);
        *entry = (*entry + delta).clamp(0.0, 1.0);
    }
}

/// Occupancy of a torpedo tube.
///
/// The weapon travels with the state, so an empty tube can never carry a
/// stale weapon definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum TubeState {
    Empty,
    Loaded { weapon: TorpedoDef },
    Flooded { weapon: TorpedoDef },
    DoorsOpen { weapon: TorpedoDef },
}

impl TubeState {
    pub fn name(&self) -> &'static str {
        match self {
            TubeState::Empty => "Empty",
            TubeState::Loaded { .. } => "Loaded",
            TubeState::Flooded { .. } => "Flooded",
            TubeState::DoorsOpen { .. } => "DoorsOpen",
        }
    }

    pub fn weapon(&self) -> Option<&TorpedoDef> {
        match self {
            TubeState::Empty => None,
            TubeState::Loaded { weapon }
            | TubeState::Flooded { weapon }
            | TubeState::DoorsOpen { weapon } => Some(weapon),
        }
    }
}

/// A pending, time-gated tube transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TubeTransition {
    pub timer_s: f64,
    pub next: TubeState,
}

/// A single torpedo tube with its time-gated state machine.
///
/// While `transition` is set, the tube is busy and further orders are
/// rejected; when the timer reaches zero the pending state is adopted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tube {
    pub idx: u32,
    pub state: TubeState,
    #[serde(default)]
    pub transition: Option<TubeTransition>,
}

impl Tube {
    pub fn new(idx: u32) -> Self {
        Self {
            idx,
            state: TubeState::Empty,
            transition: None,
        }
    }

    pub fn busy(&self) -> bool {
        self.transition.is_some()
    }

    /// Remaining transition time, zero when idle
    pub fn timer_s(&self) -> f64 {
        self.transition.as_ref().map(|t| t.timer_s).unwrap_or(0.0)
    }

    /// Name of the pending state, if a transition is running
    pub fn next_state_name(&self) -> Option<&'static str> {
        self.transition.as_ref().map(|t| t.next.name())
    }

    /// Advance the transition timer; adopts the pending state at zero.
    pub fn step(&mut self, dt: f64) {
        if let Some(mut pending) = self.transition.take() {
            pending.timer_s = (pending.timer_s - dt).max(0.0);
            if pending.timer_s <= 0.0 {
                self.state = pending.next;
            } else {
                self.transition = Some(pending);
            }
        }
    }
}

/// The ship's weapons fit: torpedo tubes, stored ordnance, depth charge
/// rack, and the cooldowns/penalties that gate their use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaponsSuite {
    pub tube_count: u32,
    pub torpedoes_stored: u32,
    pub reload_time_s: f64,
    pub flood_time_s: f64,
    pub doors_time_s: f64,
    pub tubes: Vec<Tube>,
    /// Multiplier > 1.0 slows tube timers (maintenance degradation)
    pub time_penalty_multiplier: f64,
    pub depth_charges_stored: u32,
    pub depth_charge_cooldown_s: f64,
    pub depth_charge_cooldown_timer_s: f64,
    /// AI-only rapid launch path cooldown
    pub torpedo_quick_cooldown_s: f64,
    pub torpedo_quick_cooldown_timer_s: f64,
}

impl Default for WeaponsSuite {
    fn default() -> Self {
        Self {
            tube_count: 6,
            torpedoes_stored: 6,
            reload_time_s: 45.0,
            flood_time_s: 8.0,
            doors_time_s: 3.0,
            tubes: (1..=6).map(Tube::new).collect(),
            time_penalty_multiplier: 1.0,
            depth_charges_stored: 0,
            depth_charge_cooldown_s: 2.0,
            depth_charge_cooldown_timer_s: 0.0,
            torpedo_quick_cooldown_s: 5.0,
            torpedo_quick_cooldown_timer_s: 0.0,
        }
    }
}

impl WeaponsSuite {
    /// A suite with no tubes at all (merchants, depth-charge platforms)
    pub fn unarmed() -> Self {
        Self {
            tube_count: 0,
            torpedoes_stored: 0,
            tubes: Vec::new(),
            ..Self::default()
        }
    }

    pub fn tube(&self, idx: u32) -> Option<&Tube> {
        self.tubes.iter().find(|t| t.idx == idx)
    }

    pub fn tube_mut(&mut self, idx: u32) -> Option<&mut Tube> {
        self.tubes.iter_mut().find(|t| t.idx == idx)
    }
}

/// What a platform is allowed to do; the apply paths enforce these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipCapabilities {
    pub can_set_nav: bool,
    pub has_active_sonar: bool,
    pub has_torpedoes: bool,
    pub has_guns: bool,
    pub has_depth_charges: bool,
    pub countermeasures: Vec<String>,
}

impl Default for ShipCapabilities {
    fn default() -> Self {
        Self {
            can_set_nav: true,
            has_active_sonar: true,
            has_torpedoes: true,
            has_guns: false,
            has_depth_charges: false,
            countermeasures: Vec::new(),
        }
    }
}

/// Reactor output and battery state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Reactor {
    pub output_mw: f64,
    pub max_mw: f64,
    pub scrammed: bool,
    pub battery_pct: f64,
}

impl Default for Reactor {
    fn default() -> Self {
        Self {
            output_mw: 60.0,
            max_mw: 100.0,
            scrammed: false,
            battery_pct: 100.0,
        }
    }
}

/// Accumulated damage, each component in [0, 1]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DamageState {
    pub hull: f64,
    pub sensors: f64,
    pub propulsion: f64,
    pub flooding_rate: f64,
}

/// A ship in the simulation, exclusively owned by the `World` registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ship {
    pub id: String,
    pub side: Side,
    pub ship_class: ShipClass,
    pub kin: Kinematics,
    pub hull: Hull,
    pub acoustics: Acoustics,
    pub weapons: WeaponsSuite,
    pub reactor: Reactor,
    pub damage: DamageState,
    #[serde(default)]
    pub power: PowerAllocations,
    #[serde(default)]
    pub systems: SystemsStatus,
    #[serde(default)]
    pub maintenance: MaintenanceState,
    pub capabilities: ShipCapabilities,
}

impl Ship {
    /// Hull performance factor from accumulated hull damage
    pub fn hull_damage_factor(&self) -> f64 {
        (1.0 - self.damage.hull).max(0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tube_transition_adopts_pending_state() {
        let mut tube = Tube::new(1);
        tube.transition = Some(TubeTransition {
            timer_s: 2.0,
            next: TubeState::Loaded {
                weapon: TorpedoDef::default(),
            },
        });
        tube.step(1.0);
        assert!(tube.busy());
        assert_eq!(tube.state.name(), "Empty");
        tube.step(1.0);
        assert!(!tube.busy());
        assert_eq!(tube.state.name(), "Loaded");
        assert_eq!(tube.timer_s(), 0.0);
        assert!(tube.next_state_name().is_none());
    }

    #[test]
    fn test_empty_tube_carries_no_weapon() {
        let tube = Tube::new(3);
        assert!(tube.state.weapon().is_none());
    }

    #[test]
    fn test_source_level_nearest_bin() {
        let ac = Acoustics::default();
        assert_eq!(ac.source_level_for_speed(4.0), 110.0);
        assert_eq!(ac.source_level_for_speed(11.0), 118.0);
        assert_eq!(ac.source_level_for_speed(-14.0), 130.0);
    }

    #[test]
    fn test_power_total() {
        let p = PowerAllocations::default();
        assert!((p.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_maintenance_adjust_clamps() {
        let mut m = MaintenanceState::default();
        m.adjust("rudder", 0.5);
        assert_eq!(m.level("rudder"), 1.0);
        m.adjust("rudder", -2.0);
        assert_eq!(m.level("rudder"), 0.0);
    }
}

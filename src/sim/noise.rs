//! Noise engine
//!
//! Aggregates per-station noise contributions in dB using linear-power
//! summation. Sustained sources (propulsion, reactor, masts, pumps, tube
//! operations, maintenance work) combine with short-lived impulses
//! (cavitation, depth charge drops) into station totals and an overall
//! ship level, and feed the ship's dynamic source level.

use rand::Rng;
use rand::rngs::StdRng;
use std::collections::HashMap;

use crate::models::{Ship, Station, TaskStage};

/// Sum dB levels in linear power space
pub fn sum_db(levels: &[f64]) -> f64 {
    if levels.is_empty() {
        return 0.0;
    }
    let linear: f64 = levels.iter().map(|l| 10f64.powf(l / 10.0)).sum();
    10.0 * linear.max(1e-12).log10()
}

/// Sustained mast noise (periscope or radio) in dB
pub const MAST_NOISE_DB: f64 = 60.0;
/// Sustained ballast pump noise in dB
pub const PUMP_NOISE_DB: f64 = 72.0;
/// Impulse level for a cavitating screw
pub const CAVITATION_IMPULSE_DB: f64 = 75.0;
/// Impulse level and duration for a fresh depth charge drop
pub const DEPTH_CHARGE_IMPULSE_DB: f64 = 80.0;
pub const DEPTH_CHARGE_IMPULSE_TTL_S: f64 = 0.5;

/// Noise totals per station plus the overall ship level, in dB
#[derive(Debug, Clone, Default)]
pub struct StationLevels {
    pub helm: f64,
    pub sonar: f64,
    pub weapons: f64,
    pub engineering: f64,
    pub total: f64,
}

impl StationLevels {
    pub fn get(&self, station: Station) -> f64 {
        match station {
            Station::Helm => self.helm,
            Station::Sonar => self.sonar,
            Station::Weapons => self.weapons,
            Station::Engineering => self.engineering,
        }
    }
}

/// Sustained noise toggles sampled from the loop state each tick
#[derive(Debug, Clone, Copy, Default)]
pub struct NoiseToggles {
    pub periscope_raised: bool,
    pub radio_raised: bool,
    pub pump_fwd: bool,
    pub pump_aft: bool,
}

/// Aggregates station noise across ticks, carrying live impulses
#[derive(Debug, Default)]
pub struct NoiseEngine {
    impulses: HashMap<Station, Vec<(f64, f64)>>,
    last_depth_charge_count: usize,
}

impl NoiseEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transient noise source lasting `ttl_s` seconds
    pub fn add_impulse(&mut self, station: Station, level_db: f64, ttl_s: f64) {
        self.impulses
            .entry(station)
            .or_default()
            .push((level_db, ttl_s.max(0.05)));
    }

    fn tick_impulses(&mut self, dt: f64) -> HashMap<Station, f64> {
        let mut out = HashMap::new();
        for station in Station::ALL {
            let levels: Vec<f64> = match self.impulses.get_mut(&station) {
                Some(list) => {
                    list.retain_mut(|(_, ttl)| {
                        *ttl -= dt;
                        *ttl > 0.0
                    });
                    list.iter().map(|(lvl, _)| *lvl).collect()
                }
                None => Vec::new(),
            };
            out.insert(station, if levels.is_empty() { 0.0 } else { sum_db(&levels) });
        }
        out
    }

    /// Aggregate one tick of station noise.
    ///
    /// `active_tasks` lists every live maintenance task as `(station,
    /// stage)`; `new_depth_charges` is how many charges entered the
    /// water since the last tick.
    pub fn tick(
        &mut self,
        own: &Ship,
        toggles: NoiseToggles,
        active_tasks: &[(Station, TaskStage)],
        new_depth_charges: usize,
        dt: f64,
        rng: &mut StdRng,
    ) -> StationLevels {
        let mut sustained: HashMap<Station, Vec<f64>> = HashMap::new();
        for station in Station::ALL {
            sustained.insert(station, Vec::new());
        }

        // Helm: propulsion baseline from speed fraction
        let speed_frac = (own.kin.speed / own.hull.max_speed.max(1.0)).clamp(0.0, 1.0);
        sustained
            .get_mut(&Station::Helm)
            .expect("station seeded")
            .push(50.0 + 25.0 * speed_frac.powf(1.2));

        // Engineering: reactor baseline from output fraction
        let mw_frac = (own.reactor.output_mw / own.reactor.max_mw.max(1.0)).clamp(0.0, 1.0);
        sustained
            .get_mut(&Station::Engineering)
            .expect("station seeded")
            .push(55.0 + 23.0 * mw_frac.powf(1.1));

        // Masts rumble through the sonar station's board
        if toggles.periscope_raised {
            sustained.get_mut(&Station::Sonar).expect("station seeded").push(MAST_NOISE_DB);
        }
        if toggles.radio_raised {
            sustained.get_mut(&Station::Sonar).expect("station seeded").push(MAST_NOISE_DB);
        }
        if toggles.pump_fwd {
            sustained
                .get_mut(&Station::Engineering)
                .expect("station seeded")
                .push(PUMP_NOISE_DB);
        }
        if toggles.pump_aft {
            sustained
                .get_mut(&Station::Engineering)
                .expect("station seeded")
                .push(PUMP_NOISE_DB);
        }

        // Tube operations while a transition timer runs
        for tube in &own.weapons.tubes {
            if tube.timer_s() > 0.0 {
                let level = match tube.next_state_name() {
                    Some("Loaded") => Some(62.0),
                    Some("Flooded") => Some(68.0),
                    Some("DoorsOpen") => Some(72.0),
                    _ => None,
                };
                if let Some(level) = level {
                    sustained.get_mut(&Station::Weapons).expect("station seeded").push(level);
                }
            }
        }

        // Active maintenance work, louder at worse stages
        for (station, stage) in active_tasks {
            let base = match station {
                Station::Helm => 60.0,
                Station::Sonar => 58.0,
                Station::Weapons => 64.0,
                Station::Engineering => 66.0,
            };
            let mult = match stage {
                TaskStage::Task => 1.0,
                TaskStage::Failing => 1.25,
                TaskStage::Failed => 1.5,
            };
            sustained.get_mut(station).expect("station seeded").push(base * mult);
        }

        // Fresh depth charges slam off the rack
        if new_depth_charges > self.last_depth_charge_count {
            for _ in 0..(new_depth_charges - self.last_depth_charge_count) {
                self.add_impulse(
                    Station::Weapons,
                    DEPTH_CHARGE_IMPULSE_DB,
                    DEPTH_CHARGE_IMPULSE_TTL_S,
                );
            }
        }
        self.last_depth_charge_count = new_depth_charges;

        let impulse_levels = self.tick_impulses(dt);
        let mut levels = StationLevels::default();
        for station in Station::ALL {
            let sustained_db = sum_db(sustained.get(&station).map(Vec::as_slice).unwrap_or(&[]));
            let impulse_db = impulse_levels.get(&station).copied().unwrap_or(0.0);
            let mut level = if impulse_db > 0.0 {
                sum_db(&[sustained_db, impulse_db])
            } else {
                sustained_db
            };
            // Small jitter for UI liveliness
            if level > 0.0 {
                level = (level + rng.random_range(-0.7..0.7)).max(0.0);
            }
            match station {
                Station::Helm => levels.helm = level,
                Station::Sonar => levels.sonar = level,
                Station::Weapons => levels.weapons = level,
                Station::Engineering => levels.engineering = level,
            }
        }
        levels.total = sum_db(&[levels.helm, levels.sonar, levels.weapons, levels.engineering]);
        levels
    }
}

/// Recompute the ship's operation-driven broadband source level from the
/// aggregated station noise: a speed baseline plus a scaled contribution
/// from everything the crew is doing.
pub fn dynamic_source_level(own: &Ship, levels: &StationLevels) -> f64 {
    let speed_frac = (own.kin.speed / own.hull.max_speed.max(1.0)).clamp(0.0, 1.0);
    let base = 110.0 + 20.0 * speed_frac;
    let operations = ((levels.total - 55.0) * 0.4).clamp(0.0, 30.0);
    base + operations
}

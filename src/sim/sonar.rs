//! Passive and active sonar
//!
//! Passive contacts are bearing-only, suppressed in the baffles, and
//! classified from signal quality. Active pings return noisy range and
//! bearing and always risk counter-detection by the opposing side.

use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::models::{PingResponse, Ship, ShipClass, SonarContact, SyntheticContact};
use crate::sim::physics::{angle_diff_deg, bearing_to_deg, normalize_deg};
use crate::world::World;

/// Full width of the stern baffles cone (deg)
pub const BAFFLES_DEG: f64 = 60.0;
/// Ambient noise floor (dB)
pub const AMBIENT_DB: f64 = 60.0;
/// Extra transmission loss across a thermocline layer (dB)
pub const LAYER_ATTEN_DB: f64 = 4.0;
/// Detectability below which a passive contact is not reported
pub const DETECT_GATE: f64 = 0.15;
/// Nominal active sonar range (m)
pub const ACTIVE_NOMINAL_RANGE_M: f64 = 20_000.0;
/// Range within which an active ping is counter-detected (m)
pub const COUNTER_DETECT_RANGE_M: f64 = 15_000.0;

/// Gaussian draw with graceful handling of degenerate sigma
pub fn gauss(rng: &mut StdRng, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    Normal::new(0.0, sigma)
        .map(|n| n.sample(rng))
        .unwrap_or(0.0)
}

/// Hull-damage sensor penalties, mitigated by sonar power share.
///
/// Returns `(passive_snr_db, bearing_sigma, active_range_m, active_bearing_sigma)`
/// additive components.
fn damage_sensor_penalties(ship: &Ship) -> (f64, f64, f64, f64) {
    let severity = ship.damage.sensors * (1.0 - 0.5 * ship.power.sonar.clamp(0.0, 1.0));
    (
        10.0 * severity,
        4.0 * severity,
        200.0 * severity,
        2.0 * severity,
    )
}

/// Classify a passive contact from signal quality thresholds
pub fn classify_passive(class: ShipClass, detectability: f64, snr_db: f64) -> &'static str {
    if detectability >= 0.8 && snr_db >= 25.0 {
        match class {
            ShipClass::Ssn => "SSN",
            ShipClass::Convoy => "Merchant/Convoy",
            ShipClass::Destroyer => "Warship",
        }
    } else if detectability >= 0.6 && snr_db >= 20.0 {
        match class {
            ShipClass::Ssn => "SSN?",
            ShipClass::Convoy => "Merchant?",
            ShipClass::Destroyer => "Warship?",
        }
    } else if detectability >= 0.4 && snr_db >= 15.0 {
        match class {
            ShipClass::Ssn => "Submarine?",
            ShipClass::Convoy | ShipClass::Destroyer => "Vessel?",
        }
    } else {
        "Unknown"
    }
}

/// Result of one passive sweep: the reported contacts plus the SNR and
/// detectability computed per evaluated target (for write-back and the
/// debug frame).
#[derive(Debug, Default)]
pub struct PassiveScan {
    pub contacts: Vec<SonarContact>,
    pub echoes: Vec<(String, f64, f64)>,
}

/// Passive sweep from one observer against a set of targets.
///
/// Sonar failure yields nothing. Contacts in the baffles are suppressed
/// before any signal math runs.
pub fn passive_contacts(observer: &Ship, others: &[&Ship], rng: &mut StdRng) -> PassiveScan {
    let mut scan = PassiveScan::default();
    if !observer.systems.sonar_ok {
        return scan;
    }
    let (dmg_snr_pen, dmg_bearing_sigma, _, _) = damage_sensor_penalties(observer);
    for other in others {
        if other.id == observer.id {
            continue;
        }
        let rng_m = observer.kin.range_to(&other.kin);
        let brg = bearing_to_deg(observer.kin.x, observer.kin.y, other.kin.x, other.kin.y);
        let rel = angle_diff_deg(brg, observer.kin.heading);
        if rel.abs() > 180.0 - BAFFLES_DEG / 2.0 {
            continue;
        }

        let mut source_level = other.acoustics.source_level_for_speed(other.kin.speed);
        if other.kin.depth <= 1.0 {
            source_level += 6.0;
        }
        source_level += other.acoustics.mast_bonus_db;

        let layer = if observer.acoustics.thermocline_on {
            LAYER_ATTEN_DB
        } else {
            0.0
        };
        let transmission_loss = 20.0 * rng_m.max(1.0).log10() + layer;
        let penalty = observer.acoustics.passive_snr_penalty_db + dmg_snr_pen;
        let snr = (source_level - transmission_loss - AMBIENT_DB - penalty).max(0.0);
        let detectability = (snr / 30.0).clamp(0.0, 1.0);
        scan.echoes.push((other.id.clone(), snr, detectability));
        if detectability < DETECT_GATE {
            continue;
        }

        let sigma = (10.0 - 0.3 * other.kin.speed
            + observer.acoustics.bearing_noise_extra
            + dmg_bearing_sigma)
            .max(1.0);
        let noisy_bearing = normalize_deg(
            brg + observer.acoustics.hydro_bearing_bias_deg + gauss(rng, sigma),
        );
        scan.contacts.push(SonarContact {
            id: other.id.clone(),
            bearing: noisy_bearing,
            strength: detectability,
            classified_as: classify_passive(other.ship_class, detectability, snr).to_string(),
            confidence: (detectability * 1.2).min(1.0),
            bearing_known: true,
            range_known: false,
            detectability,
            snr_db: snr,
            bearing_sigma_deg: sigma,
        });
    }
    scan
}

/// Cooldown state for one ship's active sonar
#[derive(Debug, Clone)]
pub struct ActivePingState {
    pub cooldown_s: f64,
    pub timer: f64,
}

impl ActivePingState {
    pub fn new(cooldown_s: f64) -> Self {
        Self {
            cooldown_s,
            timer: 0.0,
        }
    }

    pub fn can_ping(&self) -> bool {
        self.timer <= 0.0
    }

    pub fn tick(&mut self, dt: f64) {
        if self.timer > 0.0 {
            self.timer = (self.timer - dt).max(0.0);
        }
    }

    /// Start a ping if off cooldown; returns whether it fired
    pub fn start(&mut self) -> bool {
        if self.can_ping() {
            self.timer = self.cooldown_s;
            true
        } else {
            false
        }
    }
}

/// Active ping from one observer: noisy range/bearing per target within
/// nominal range. Sonar failure yields nothing.
pub fn active_ping(
    observer: &Ship,
    others: &[&Ship],
    now_s: f64,
    rng: &mut StdRng,
) -> Vec<PingResponse> {
    if !observer.systems.sonar_ok {
        return Vec::new();
    }
    let (_, _, dmg_range_add, dmg_bearing_sigma) = damage_sensor_penalties(observer);
    let mut responses = Vec::new();
    for other in others {
        if other.id == observer.id {
            continue;
        }
        let rng_m = observer.kin.range_to(&other.kin);
        if rng_m > ACTIVE_NOMINAL_RANGE_M {
            continue;
        }
        let brg = bearing_to_deg(observer.kin.x, observer.kin.y, other.kin.x, other.kin.y);
        let range_sigma = 0.02 * rng_m + 5.0 + observer.acoustics.active_range_noise_add_m
            + dmg_range_add;
        let bearing_sigma =
            1.5 + observer.acoustics.active_bearing_noise_extra + dmg_bearing_sigma;
        let noisy_range = (rng_m + gauss(rng, range_sigma)).max(1.0);
        responses.push(PingResponse {
            id: other.id.clone(),
            bearing: normalize_deg(brg + gauss(rng, bearing_sigma)),
            range_est: noisy_range,
            strength: (1.0 / (1.0 + noisy_range / 2000.0)).clamp(0.0, 1.0),
            at_s: now_s,
        });
    }
    responses
}

/// Synthetic contacts handed to the opposing side when a ship pings.
///
/// Every opposing ship within 15 km hears the emitter on a slightly
/// noisy bearing; the contact carries no range.
pub fn counter_detection_contacts(
    pinger: &Ship,
    world: &World,
    now_s: f64,
    rng: &mut StdRng,
) -> Vec<SyntheticContact> {
    let mut contacts = Vec::new();
    for listener in world.all_ships() {
        if listener.side == pinger.side {
            continue;
        }
        let rng_m = listener.kin.range_to(&pinger.kin);
        if rng_m > COUNTER_DETECT_RANGE_M {
            continue;
        }
        let brg = bearing_to_deg(listener.kin.x, listener.kin.y, pinger.kin.x, pinger.kin.y);
        contacts.push(SyntheticContact {
            observer_id: listener.id.clone(),
            contact_id: pinger.id.clone(),
            kind: "ENEMY_ACTIVE_SONAR".to_string(),
            bearing: normalize_deg(brg + gauss(rng, 2.0)),
            strength: (1.0 / (1.0 + rng_m / 2000.0)).clamp(0.0, 1.0),
            confidence: 0.8,
            range_known: false,
            at_s: now_s,
        });
    }
    contacts
}

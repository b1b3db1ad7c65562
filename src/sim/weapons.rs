//! Weapon state machines and ordnance stepping
//!
//! Torpedo tubes walk `Empty -> Loaded -> Flooded -> DoorsOpen` through
//! time-gated transitions; firing requires open doors and clears the
//! tube. Torpedoes run proportional navigation after arming; depth
//! charges sink to a fused depth and apply ringed blast damage.

use rand::Rng;
use rand::rngs::StdRng;
use uuid::Uuid;

use crate::events::{EventQueue, TickEvent};
use crate::models::{DepthCharge, Ship, Torpedo, TorpedoDef, Tube, TubeState, TubeTransition};
use crate::sim::physics::{angle_diff_deg, bearing_to_deg, constants::KNOTS_TO_MPS, normalize_deg};
use crate::world::World;

/// Proximity fuze radius (m)
const FUZE_RADIUS_M: f64 = 30.0;
/// Pre-arm shooter avoidance radius (m) and cone half-angle (deg)
const PREARM_AVOID_RANGE_M: f64 = 300.0;
const PREARM_AVOID_CONE_DEG: f64 = 60.0;
/// Post-arm self-destruct radius against the shooter (m)
const SELF_DESTRUCT_RANGE_M: f64 = 200.0;
/// Torpedo turn authority (deg/s), reduced while spoofed
const MAX_TURN_RATE_DPS: f64 = 20.0;
const MAX_TURN_RATE_SPOOFED_DPS: f64 = 10.0;
/// Per-tick spoof probability while under guidance
const SPOOF_PROBABILITY: f64 = 0.02;
/// Depth charge sink rate and fuze window
const DC_SINK_RATE_MPS: f64 = 5.0;
const DC_FUZE_WINDOW_M: f64 = 1.0;
const DC_MIN_DETONATION_DEPTH_M: f64 = 15.0;

/// Scale factor applied to tube transition times.
///
/// Maintenance penalties multiply the base times; weapons power share
/// and hull damage divide them (a starved or battered weapons gang
/// works slower).
pub fn tube_time_scale(ship: &Ship) -> f64 {
    let penalty = ship.weapons.time_penalty_multiplier.max(1.0);
    let power_factor = (0.5 + 2.0 * ship.power.weapons).clamp(0.5, 1.5);
    let damage_factor = ship.hull_damage_factor().max(0.2);
    penalty / (power_factor * damage_factor)
}

/// Advance all tube transitions and weapon cooldowns for one ship
pub fn step_tubes(ship: &mut Ship, dt: f64) {
    let ws = &mut ship.weapons;
    if ws.depth_charge_cooldown_timer_s > 0.0 {
        ws.depth_charge_cooldown_timer_s = (ws.depth_charge_cooldown_timer_s - dt).max(0.0);
    }
    if ws.torpedo_quick_cooldown_timer_s > 0.0 {
        ws.torpedo_quick_cooldown_timer_s = (ws.torpedo_quick_cooldown_timer_s - dt).max(0.0);
    }
    for tube in &mut ws.tubes {
        tube.step(dt);
    }
}

fn tube_ready(ship: &Ship, idx: u32) -> Result<&Tube, String> {
    if !ship.systems.tubes_ok {
        return Err("Tubes offline".to_string());
    }
    let tube = ship
        .weapons
        .tube(idx)
        .ok_or_else(|| format!("No tube {}", idx))?;
    if tube.busy() {
        return Err(format!("Tube {} busy", idx));
    }
    Ok(tube)
}

/// Begin loading a weapon into an empty tube
pub fn try_load_tube(ship: &mut Ship, idx: u32, weapon_name: &str) -> Result<(), String> {
    let tube = tube_ready(ship, idx)?;
    if !matches!(tube.state, TubeState::Empty) {
        return Err(format!("Tube {} not empty", idx));
    }
    if ship.weapons.torpedoes_stored == 0 {
        return Err("No torpedoes remaining".to_string());
    }
    let timer = ship.weapons.reload_time_s * tube_time_scale(ship);
    let weapon = TorpedoDef {
        name: weapon_name.to_string(),
        ..TorpedoDef::default()
    };
    ship.weapons.torpedoes_stored -= 1;
    let tube = ship.weapons.tube_mut(idx).expect("tube checked above");
    tube.transition = Some(TubeTransition {
        timer_s: timer,
        next: TubeState::Loaded { weapon },
    });
    Ok(())
}

/// Begin flooding a loaded tube
pub fn try_flood_tube(ship: &mut Ship, idx: u32) -> Result<(), String> {
    let tube = tube_ready(ship, idx)?;
    let TubeState::Loaded { weapon } = &tube.state else {
        return Err(format!("Tube {} not loaded", idx));
    };
    let weapon = weapon.clone();
    let timer = ship.weapons.flood_time_s * tube_time_scale(ship);
    let tube = ship.weapons.tube_mut(idx).expect("tube checked above");
    tube.transition = Some(TubeTransition {
        timer_s: timer,
        next: TubeState::Flooded { weapon },
    });
    Ok(())
}

/// Begin opening (or closing) the muzzle doors of a flooded tube
pub fn try_set_doors(ship: &mut Ship, idx: u32, open: bool) -> Result<(), String> {
    let tube = tube_ready(ship, idx)?;
    let timer = ship.weapons.doors_time_s * tube_time_scale(ship);
    match (&tube.state, open) {
        (TubeState::Flooded { weapon }, true) => {
            let weapon = weapon.clone();
            let tube = ship.weapons.tube_mut(idx).expect("tube checked above");
            tube.transition = Some(TubeTransition {
                timer_s: timer,
                next: TubeState::DoorsOpen { weapon },
            });
            Ok(())
        }
        (TubeState::DoorsOpen { weapon }, false) => {
            let weapon = weapon.clone();
            let tube = ship.weapons.tube_mut(idx).expect("tube checked above");
            tube.transition = Some(TubeTransition {
                timer_s: timer,
                next: TubeState::Flooded { weapon },
            });
            Ok(())
        }
        _ => Err(format!("Tube {} doors order invalid", idx)),
    }
}

fn make_torpedo(
    ship: &Ship,
    weapon: &TorpedoDef,
    bearing_deg: f64,
    run_depth: f64,
    enable_range_m: Option<f64>,
    doctrine: &str,
) -> Torpedo {
    Torpedo {
        id: format!("torpedo-{}-{}", ship.id, Uuid::new_v4().simple()),
        name: weapon.name.clone(),
        side: ship.side,
        shooter_id: ship.id.clone(),
        x: ship.kin.x,
        y: ship.kin.y,
        depth: ship.kin.depth,
        heading: normalize_deg(bearing_deg),
        speed_kn: weapon.speed_kn,
        armed: false,
        enable_range_m: enable_range_m.unwrap_or(weapon.enable_range_m),
        seeker_range_m: weapon.seeker_range_m,
        seeker_cone_deg: weapon.seeker_cone_deg,
        run_time_s: 0.0,
        max_run_time_s: weapon.max_run_time_s,
        run_depth,
        doctrine: doctrine.to_string(),
        spoofed_timer_s: 0.0,
        pn_nav_const: 3.0,
        los_prev: None,
    }
}

/// Fire a tube with open doors; clears the tube and returns the weapon
pub fn try_fire(
    ship: &mut Ship,
    idx: u32,
    bearing_deg: f64,
    run_depth: f64,
    enable_range_m: Option<f64>,
    doctrine: &str,
) -> Result<Torpedo, String> {
    let tube = ship
        .weapons
        .tube(idx)
        .ok_or_else(|| format!("No tube {}", idx))?;
    if tube.busy() {
        return Err(format!("Tube {} busy", idx));
    }
    let TubeState::DoorsOpen { weapon } = &tube.state else {
        return Err(format!("Tube {} doors not open", idx));
    };
    let torpedo = make_torpedo(ship, &weapon.clone(), bearing_deg, run_depth, enable_range_m, doctrine);
    let tube = ship.weapons.tube_mut(idx).expect("tube checked above");
    tube.state = TubeState::Empty;
    tube.transition = None;
    Ok(torpedo)
}

/// Debug test shot: spawns a default weapon without touching tubes,
/// inventory, or cooldowns.
pub fn spawn_test_torpedo(
    ship: &Ship,
    bearing_deg: f64,
    run_depth: f64,
    enable_range_m: f64,
) -> Torpedo {
    make_torpedo(
        ship,
        &TorpedoDef::default(),
        bearing_deg,
        run_depth,
        Some(enable_range_m),
        "passive_then_active",
    )
}

/// AI-only rapid launch that bypasses tube preparation
pub fn try_launch_torpedo_quick(
    ship: &mut Ship,
    bearing_deg: f64,
    run_depth: f64,
    enable_range_m: Option<f64>,
    doctrine: &str,
) -> Result<Torpedo, String> {
    if !ship.capabilities.has_torpedoes {
        return Err("No torpedoes capability".to_string());
    }
    if ship.weapons.torpedoes_stored == 0 {
        return Err("No torpedoes remaining".to_string());
    }
    if ship.weapons.torpedo_quick_cooldown_timer_s > 0.0 {
        return Err("Torpedo system cooling down".to_string());
    }
    let weapon = TorpedoDef::default();
    let torpedo = make_torpedo(ship, &weapon, bearing_deg, run_depth, enable_range_m, doctrine);
    ship.weapons.torpedoes_stored -= 1;
    ship.weapons.torpedo_quick_cooldown_timer_s = ship.weapons.torpedo_quick_cooldown_s.max(0.0);
    Ok(torpedo)
}

/// Drop a spread of depth charges around the ship's position.
///
/// Each charge lands at a random offset within `spread_m` and fuzes at a
/// uniformly sampled depth within `[max(15, min_depth), max_depth]`.
pub fn try_drop_depth_charges(
    ship: &mut Ship,
    spread_m: f64,
    min_depth: f64,
    max_depth: f64,
    spread_size: u32,
    rng: &mut StdRng,
) -> Result<Vec<DepthCharge>, String> {
    if !ship.capabilities.has_depth_charges {
        return Err("No depth charges capability".to_string());
    }
    if ship.weapons.depth_charges_stored == 0 {
        return Err("No depth charges remaining".to_string());
    }
    if ship.weapons.depth_charge_cooldown_timer_s > 0.0 {
        return Err("Depth charge system cooling down".to_string());
    }
    let count = spread_size
        .max(1)
        .min(10)
        .min(ship.weapons.depth_charges_stored);
    let floor = min_depth.max(DC_MIN_DETONATION_DEPTH_M);
    let ceiling = max_depth.max(floor);
    let mut charges = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let r = rng.random_range(0.0..=spread_m.max(0.0));
        let theta = rng.random_range(0.0..std::f64::consts::TAU);
        let target_depth = if ceiling > floor {
            rng.random_range(floor..=ceiling)
        } else {
            floor
        };
        charges.push(DepthCharge {
            id: format!("dc-{}-{}", ship.id, Uuid::new_v4().simple()),
            side: ship.side,
            x: ship.kin.x + theta.cos() * r,
            y: ship.kin.y + theta.sin() * r,
            depth: ship.kin.depth.max(0.0),
            target_depth,
            sink_rate_mps: DC_SINK_RATE_MPS,
            armed: true,
            exploded: false,
        });
    }
    ship.weapons.depth_charges_stored -= count;
    ship.weapons.depth_charge_cooldown_timer_s = ship.weapons.depth_charge_cooldown_s.max(0.0);
    Ok(charges)
}

/// Step one torpedo: arming, safeties, fuze, guidance, and motion
pub fn step_torpedo(
    t: &mut Torpedo,
    world: &mut World,
    dt: f64,
    rng: &mut StdRng,
    events: &mut EventQueue,
    spoofing_enabled: bool,
) {
    let shooter_pose = world.get_ship(&t.shooter_id).map(|s| (s.kin.x, s.kin.y));
    let shooter_range = shooter_pose
        .map(|(sx, sy)| ((sx - t.x).powi(2) + (sy - t.y).powi(2)).sqrt())
        .unwrap_or(f64::INFINITY);

    if !t.armed && shooter_range >= t.enable_range_m {
        t.armed = true;
        events.push(TickEvent::TorpedoArmed {
            id: t.id.clone(),
            name: t.name.clone(),
        });
    }

    if t.spoofed_timer_s > 0.0 {
        t.spoofed_timer_s = (t.spoofed_timer_s - dt).max(0.0);
    }

    if !t.armed {
        // Pre-arm safety: slew away from the shooter if it sits ahead
        if let Some((sx, sy)) = shooter_pose {
            if shooter_range < PREARM_AVOID_RANGE_M {
                let bearing_to_shooter = bearing_to_deg(t.x, t.y, sx, sy);
                let off = angle_diff_deg(bearing_to_shooter, t.heading).abs();
                if off < PREARM_AVOID_CONE_DEG {
                    let away = normalize_deg(bearing_to_shooter + 180.0);
                    let dh = angle_diff_deg(away, t.heading);
                    let max_turn = 30.0 * dt;
                    t.heading = normalize_deg(t.heading + dh.clamp(-max_turn, max_turn));
                }
            }
        }
    } else if shooter_range < SELF_DESTRUCT_RANGE_M && t.run_time_s > 3.0 {
        // Post-arm safety: never home on the shooter
        events.push(TickEvent::TorpedoSelfDestruct {
            id: t.id.clone(),
            reason: "shooter_proximity".to_string(),
            range_m: shooter_range,
        });
        t.terminate();
        return;
    }

    if t.armed {
        let hit = world
            .all_ships()
            .filter(|s| s.side != t.side)
            .map(|s| (s.id.clone(), s.kin.range_to_point(t.x, t.y)))
            .find(|(_, rng_m)| *rng_m < FUZE_RADIUS_M);
        if let Some((target_id, range_m)) = hit {
            if let Some(target) = world.get_ship_mut(&target_id) {
                target.damage.hull = (target.damage.hull + 0.5).min(1.0);
                target.damage.flooding_rate = (target.damage.flooding_rate + 2.0).min(10.0);
            }
            events.push(TickEvent::TorpedoDetonated {
                id: t.id.clone(),
                target: target_id,
                range_m,
            });
            t.terminate();
            return;
        }
    }

    if t.armed {
        let thermocline = world
            .get_ship(&t.shooter_id)
            .map(|s| s.acoustics.thermocline_on)
            .unwrap_or(false);
        if let Some((tx, ty)) = nearest_target(t, world, thermocline) {
            if spoofing_enabled && t.spoofed_timer_s == 0.0 && rng.random::<f64>() < SPOOF_PROBABILITY
            {
                t.spoofed_timer_s = 3.0;
                events.push(TickEvent::TorpedoSpoofed {
                    id: t.id.clone(),
                    seconds: t.spoofed_timer_s,
                });
            }
            let spoofed = t.spoofed_timer_s > 0.0;
            let max_turn_rate = if spoofed {
                MAX_TURN_RATE_SPOOFED_DPS
            } else {
                MAX_TURN_RATE_DPS
            };
            let los = bearing_to_deg(t.x, t.y, tx, ty);
            match t.los_prev {
                None => {
                    // First guidance frame: proportional-to-error only
                    let mut dh = angle_diff_deg(los, t.heading);
                    if spoofed {
                        dh += rng.random_range(-30.0..30.0);
                    }
                    let applied = dh.clamp(-max_turn_rate, max_turn_rate) * dt;
                    t.heading = normalize_deg(t.heading + applied);
                    t.los_prev = Some(los);
                }
                Some(los_prev) => {
                    let los_rate = angle_diff_deg(los, los_prev) / dt.max(1e-6);
                    t.los_prev = Some(los);
                    let mut commanded = t.pn_nav_const * los_rate
                        + 1.0 * angle_diff_deg(los, t.heading);
                    if spoofed {
                        commanded += rng.random_range(-30.0..30.0);
                    }
                    let applied = commanded.clamp(-max_turn_rate, max_turn_rate) * dt;
                    t.heading = normalize_deg(t.heading + applied);
                }
            }
        }
    }

    // Slew toward run depth, then advance along the compass heading
    let dz = (t.run_depth - t.depth).clamp(-DC_SINK_RATE_MPS * dt, DC_SINK_RATE_MPS * dt);
    t.depth = (t.depth + dz).max(0.0);
    let mps = t.speed_kn * KNOTS_TO_MPS;
    let heading_rad = t.heading.to_radians();
    t.x += heading_rad.sin() * mps * dt;
    t.y += heading_rad.cos() * mps * dt;
    t.run_time_s += dt;
}

/// Nearest opposing ship inside the seeker cone and range
fn nearest_target(t: &Torpedo, world: &World, thermocline: bool) -> Option<(f64, f64)> {
    let env_mult = if thermocline { 0.6 } else { 1.0 };
    let max_range = t.seeker_range_m * env_mult;
    let mut best: Option<(f64, (f64, f64))> = None;
    for ship in world.all_ships() {
        if ship.side == t.side {
            continue;
        }
        let range = ship.kin.range_to_point(t.x, t.y);
        if range > max_range {
            continue;
        }
        let bearing = bearing_to_deg(t.x, t.y, ship.kin.x, ship.kin.y);
        if angle_diff_deg(bearing, t.heading).abs() > t.seeker_cone_deg / 2.0 {
            continue;
        }
        if best.as_ref().map(|(d, _)| range < *d).unwrap_or(true) {
            best = Some((range, (ship.kin.x, ship.kin.y)));
        }
    }
    best.map(|(_, pos)| pos)
}

/// Step one depth charge: sink, then detonate in the fuze window
pub fn step_depth_charge(
    dc: &mut DepthCharge,
    world: &mut World,
    dt: f64,
    events: &mut EventQueue,
) {
    if dc.exploded {
        return;
    }
    dc.depth += dc.sink_rate_mps * dt;
    if (dc.depth - dc.target_depth).abs() > DC_FUZE_WINDOW_M {
        return;
    }
    // Ringed blast damage against the opposing side, 3D distance
    let victims: Vec<(String, f64)> = world
        .all_ships()
        .filter(|s| s.side != dc.side)
        .map(|s| {
            let dx = s.kin.x - dc.x;
            let dy = s.kin.y - dc.y;
            let dz = s.kin.depth - dc.depth;
            (s.id.clone(), (dx * dx + dy * dy + dz * dz).sqrt())
        })
        .filter(|(_, dist)| *dist <= 120.0)
        .collect();
    for (id, dist) in victims {
        if let Some(ship) = world.get_ship_mut(&id) {
            if dist <= 60.0 {
                ship.damage.hull = (ship.damage.hull + 0.40).min(1.0);
                ship.damage.flooding_rate = (ship.damage.flooding_rate + 2.0).min(10.0);
                events.push(TickEvent::DepthChargeHit { target: id, range_m: dist });
            } else {
                ship.damage.hull = (ship.damage.hull + 0.15).min(1.0);
                ship.damage.flooding_rate = (ship.damage.flooding_rate + 0.5).min(10.0);
                events.push(TickEvent::DepthChargeNear { target: id, range_m: dist });
            }
        }
    }
    dc.exploded = true;
    events.push(TickEvent::DepthChargeDetonated {
        depth_m: dc.depth,
        x: dc.x,
        y: dc.y,
    });
}

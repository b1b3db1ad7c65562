//! Kinematics integration
//!
//! Slews heading, speed, and depth toward their ordered setpoints under
//! hull, damage, and reactor limits, then advances position using the
//! compass convention (0° = north, 90° = east; x east, y north).

use crate::models::Ship;

/// Physics constants
pub mod constants {
    /// Knots to meters per second
    pub const KNOTS_TO_MPS: f64 = 0.514444;
    /// Depth change rate with ballast pumps boosting (m/s)
    pub const DEPTH_RATE_BOOST_MPS: f64 = 6.0;
    /// Normal depth change rate (m/s)
    pub const DEPTH_RATE_MPS: f64 = 3.0;
    /// Depth change rate with a failed ballast system (m/s)
    pub const DEPTH_RATE_BALLAST_FAILED_MPS: f64 = 0.5;
}

/// Normalize an angle into [0, 360)
pub fn normalize_deg(angle: f64) -> f64 {
    angle.rem_euclid(360.0)
}

/// Shortest signed angular difference `a - b`, in [-180, 180)
pub fn angle_diff_deg(a: f64, b: f64) -> f64 {
    (a - b + 540.0).rem_euclid(360.0) - 180.0
}

/// True compass bearing from `(x, y)` toward `(tx, ty)`
pub fn bearing_to_deg(x: f64, y: f64, tx: f64, ty: f64) -> f64 {
    normalize_deg((tx - x).atan2(ty - y).to_degrees())
}

/// Speed above which the screw cavitates at a given depth, in knots
pub fn cavitation_speed_for_depth(depth_m: f64) -> f64 {
    (0.08 * depth_m + 5.0).clamp(5.0, 30.0)
}

/// Integrate one ship's kinematics for one tick.
///
/// Returns `(cavitating, heading, speed, depth)` after the step. The
/// ordered depth is clamped to `[0, hull.max_depth]`; heading stays in
/// [0, 360) after every mutation.
pub fn integrate_kinematics(
    ship: &mut Ship,
    ordered_heading: f64,
    ordered_speed: f64,
    ordered_depth: f64,
    dt: f64,
    ballast_boost: bool,
) -> (bool, f64, f64, f64) {
    let damage_factor = ship.hull_damage_factor();
    let reactor_frac = ship.reactor.output_mw / ship.reactor.max_mw.max(1.0);
    let cap_speed = ship.hull.max_speed * reactor_frac * damage_factor;
    let target_speed = ordered_speed.clamp(0.0, cap_speed);

    let accel_factor = damage_factor.max(0.2);
    let prev_speed = ship.kin.speed;
    if target_speed > ship.kin.speed {
        ship.kin.speed =
            (ship.kin.speed + ship.hull.accel_max * accel_factor * dt).min(target_speed);
    } else {
        ship.kin.speed =
            (ship.kin.speed - ship.hull.decel_max * accel_factor * dt).max(target_speed);
    }
    ship.kin.accel = (ship.kin.speed - prev_speed) / dt.max(1e-9);

    // Rudder failure disables turning entirely
    let turn_factor = damage_factor.max(0.2);
    let dh = angle_diff_deg(ordered_heading, ship.kin.heading);
    let max_turn = ship.hull.turn_rate_max * turn_factor * dt;
    let turn = if ship.systems.rudder_ok {
        dh.clamp(-max_turn, max_turn)
    } else {
        0.0
    };
    ship.kin.heading = normalize_deg(ship.kin.heading + turn);
    ship.kin.turn_rate = turn / dt.max(1e-9);

    let base_depth_rate = if !ship.systems.ballast_ok {
        constants::DEPTH_RATE_BALLAST_FAILED_MPS
    } else if ballast_boost {
        constants::DEPTH_RATE_BOOST_MPS
    } else {
        constants::DEPTH_RATE_MPS
    };
    let max_depth_rate = base_depth_rate * turn_factor;
    let target_depth = ordered_depth.clamp(0.0, ship.hull.max_depth);
    let dz = target_depth - ship.kin.depth;
    let step = dz.clamp(-max_depth_rate * dt, max_depth_rate * dt);
    ship.kin.depth = (ship.kin.depth + step).clamp(0.0, ship.hull.max_depth);
    ship.kin.depth_rate = step / dt.max(1e-9);

    let sog_mps = ship.kin.speed * constants::KNOTS_TO_MPS;
    let heading_rad = ship.kin.heading.to_radians();
    ship.kin.x += heading_rad.sin() * sog_mps * dt;
    ship.kin.y += heading_rad.cos() * sog_mps * dt;

    let cavitating = ship.kin.speed > cavitation_speed_for_depth(ship.kin.depth);
    (cavitating, ship.kin.heading, ship.kin.speed, ship.kin.depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ShipCapabilities, ShipClass, Side};

    fn test_ship(heading: f64, speed: f64) -> Ship {
        Ship {
            id: "ownship".to_string(),
            side: Side::Blue,
            ship_class: ShipClass::Ssn,
            kin: crate::models::Kinematics {
                depth: 100.0,
                heading,
                speed,
                ..Default::default()
            },
            hull: Default::default(),
            acoustics: Default::default(),
            weapons: Default::default(),
            reactor: crate::models::Reactor {
                output_mw: 100.0,
                max_mw: 100.0,
                ..Default::default()
            },
            damage: Default::default(),
            power: Default::default(),
            systems: Default::default(),
            maintenance: Default::default(),
            capabilities: ShipCapabilities::default(),
        }
    }

    #[test]
    fn test_compass_bearings() {
        assert_eq!(bearing_to_deg(0.0, 0.0, 1000.0, 0.0), 90.0);
        assert_eq!(bearing_to_deg(0.0, 0.0, 0.0, 1000.0), 0.0);
        assert_eq!(bearing_to_deg(0.0, 0.0, -1000.0, 0.0), 270.0);
        assert_eq!(bearing_to_deg(0.0, 0.0, 0.0, -1000.0), 180.0);
    }

    #[test]
    fn test_motion_follows_compass_axes() {
        // Northbound: y increases, x stays put
        let mut ship = test_ship(0.0, 10.0);
        integrate_kinematics(&mut ship, 0.0, 10.0, 100.0, 1.0, false);
        assert!(ship.kin.y > 0.0);
        assert!(ship.kin.x.abs() < ship.kin.y * 0.1);

        // Eastbound: x increases
        let mut ship = test_ship(90.0, 10.0);
        integrate_kinematics(&mut ship, 90.0, 10.0, 100.0, 1.0, false);
        assert!(ship.kin.x > 0.0);
        assert!(ship.kin.y.abs() < ship.kin.x * 0.1);

        // Westbound: x decreases
        let mut ship = test_ship(270.0, 10.0);
        integrate_kinematics(&mut ship, 270.0, 10.0, 100.0, 1.0, false);
        assert!(ship.kin.x < 0.0);
    }

    #[test]
    fn test_heading_slew_limited_by_turn_rate() {
        let mut ship = test_ship(0.0, 5.0);
        integrate_kinematics(&mut ship, 90.0, 5.0, 100.0, 1.0, false);
        // turn_rate_max is 7 deg/s
        assert!((ship.kin.heading - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_rudder_failure_blocks_turning() {
        let mut ship = test_ship(10.0, 5.0);
        ship.systems.rudder_ok = false;
        integrate_kinematics(&mut ship, 100.0, 5.0, 100.0, 1.0, false);
        assert_eq!(ship.kin.heading, 10.0);
    }

    #[test]
    fn test_ballast_failure_limits_depth_rate() {
        let mut ship = test_ship(0.0, 5.0);
        ship.systems.ballast_ok = false;
        let d0 = ship.kin.depth;
        integrate_kinematics(&mut ship, 0.0, 5.0, d0 + 100.0, 1.0, false);
        assert!(ship.kin.depth - d0 < 1.0);
    }

    #[test]
    fn test_depth_clamped_to_hull_limits() {
        let mut ship = test_ship(0.0, 5.0);
        ship.kin.depth = ship.hull.max_depth - 0.1;
        for _ in 0..100 {
            integrate_kinematics(&mut ship, 0.0, 5.0, 10_000.0, 1.0, true);
        }
        assert!(ship.kin.depth <= ship.hull.max_depth);

        ship.kin.depth = 0.5;
        for _ in 0..100 {
            integrate_kinematics(&mut ship, 0.0, 5.0, -500.0, 1.0, true);
        }
        assert!(ship.kin.depth >= 0.0);
    }

    #[test]
    fn test_reactor_caps_speed() {
        let mut ship = test_ship(0.0, 0.0);
        ship.reactor.output_mw = 50.0;
        for _ in 0..600 {
            integrate_kinematics(&mut ship, 0.0, 30.0, 100.0, 1.0, false);
        }
        // 50% reactor output caps at half of max_speed
        assert!(ship.kin.speed <= ship.hull.max_speed * 0.5 + 1e-6);
    }

    #[test]
    fn test_hull_damage_slows_ship() {
        let mut ship = test_ship(0.0, 0.0);
        ship.damage.hull = 0.5;
        for _ in 0..600 {
            integrate_kinematics(&mut ship, 0.0, 30.0, 100.0, 1.0, false);
        }
        assert!(ship.kin.speed <= ship.hull.max_speed * 0.5 + 1e-6);
    }

    #[test]
    fn test_cavitation_threshold() {
        assert_eq!(cavitation_speed_for_depth(0.0), 5.0);
        assert_eq!(cavitation_speed_for_depth(100.0), 13.0);
        assert_eq!(cavitation_speed_for_depth(1000.0), 30.0);

        let mut ship = test_ship(0.0, 20.0);
        ship.kin.depth = 10.0;
        let (cav, _, _, _) = integrate_kinematics(&mut ship, 0.0, 20.0, 10.0, 0.05, false);
        assert!(cav);
    }

    #[test]
    fn test_heading_normalized_after_wraparound() {
        let mut ship = test_ship(358.0, 5.0);
        integrate_kinematics(&mut ship, 10.0, 5.0, 100.0, 1.0, false);
        assert!(ship.kin.heading < 360.0 && ship.kin.heading >= 0.0);
        // Took the short way through north
        assert!(ship.kin.heading > 358.0 || ship.kin.heading < 10.0);
    }
}

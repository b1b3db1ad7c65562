//! Damage control and engineering
//!
//! Flooding decays under pump effect; the reactor and battery respond to
//! SCRAM state; engineering power keeps maintenance levels climbing and
//! the system go/no-go flags are re-derived from those levels.

use crate::models::Ship;

/// Maintenance level at or below which a system goes offline
pub const SYSTEM_FAIL_LEVEL: f64 = 0.2;
/// Pump effect on flooding rate when any ballast pump runs
pub const PUMP_EFFECT: f64 = 2.0;
/// Reactor output ceiling while scrammed (MW)
pub const SCRAM_OUTPUT_CAP_MW: f64 = 10.0;

/// Decay flooding under the current pump effect
pub fn step_damage(ship: &mut Ship, dt: f64, pump_effect: f64) {
    if ship.damage.flooding_rate > 0.0 {
        ship.damage.flooding_rate = (ship.damage.flooding_rate - pump_effect * dt).max(0.0);
    }
}

/// One engineering tick: reactor/battery dynamics, maintenance level
/// drift, and system flag re-derivation.
pub fn step_engineering(ship: &mut Ship, dt: f64) {
    if ship.reactor.scrammed {
        ship.reactor.output_mw = ship.reactor.output_mw.min(SCRAM_OUTPUT_CAP_MW);
        // Battery carries the shaft load while scrammed
        let speed_frac = (ship.kin.speed / ship.hull.max_speed.max(1.0)).clamp(0.0, 1.0);
        let drain_pct_per_s = 1.0 * speed_frac / 60.0;
        ship.reactor.battery_pct = (ship.reactor.battery_pct - drain_pct_per_s * dt).max(0.0);
        if ship.reactor.battery_pct <= 0.0 {
            ship.reactor.output_mw = 0.0;
        }
    }

    // Engineering share above 10% keeps the plant improving; a starved
    // plant slowly decays.
    let delta = if ship.power.engineering > 0.1 {
        0.1 * dt
    } else {
        -0.01 * dt
    };
    let systems: Vec<String> = ship.maintenance.levels.keys().cloned().collect();
    for system in systems {
        ship.maintenance.adjust(&system, delta);
    }

    ship.systems.rudder_ok = ship.maintenance.level("rudder") > SYSTEM_FAIL_LEVEL;
    ship.systems.ballast_ok = ship.maintenance.level("ballast") > SYSTEM_FAIL_LEVEL;
    ship.systems.sonar_ok = ship.maintenance.level("sonar") > SYSTEM_FAIL_LEVEL;
    ship.systems.radio_ok = ship.maintenance.level("radio") > SYSTEM_FAIL_LEVEL;
    ship.systems.periscope_ok = ship.maintenance.level("periscope") > SYSTEM_FAIL_LEVEL;
    ship.systems.tubes_ok = ship.maintenance.level("tubes") > SYSTEM_FAIL_LEVEL;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{builtin_catalog, spawn_ship};
    use crate::models::{Kinematics, Side};

    fn own_ship() -> Ship {
        let catalog = builtin_catalog();
        spawn_ship(
            &catalog["SSN"],
            "ownship",
            Side::Blue,
            Kinematics {
                depth: 100.0,
                speed: 8.0,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_flooding_decays_with_pumps() {
        let mut ship = own_ship();
        ship.damage.flooding_rate = 4.0;
        step_damage(&mut ship, 1.0, PUMP_EFFECT);
        assert!((ship.damage.flooding_rate - 2.0).abs() < 1e-9);
        // Without pumps, flooding persists
        step_damage(&mut ship, 1.0, 0.0);
        assert!((ship.damage.flooding_rate - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_scram_caps_output_and_drains_battery() {
        let mut ship = own_ship();
        ship.reactor.scrammed = true;
        ship.reactor.output_mw = 60.0;
        ship.kin.speed = ship.hull.max_speed;
        step_engineering(&mut ship, 1.0);
        assert!(ship.reactor.output_mw <= SCRAM_OUTPUT_CAP_MW);
        assert!(ship.reactor.battery_pct < 100.0);

        ship.reactor.battery_pct = 0.001;
        step_engineering(&mut ship, 60.0);
        assert_eq!(ship.reactor.output_mw, 0.0);
    }

    #[test]
    fn test_low_maintenance_forces_failures_and_recovers() {
        let mut ship = own_ship();
        for level in ship.maintenance.levels.values_mut() {
            *level = 0.1;
        }
        step_engineering(&mut ship, 0.05);
        assert!(!ship.systems.rudder_ok);
        assert!(!ship.systems.ballast_ok);
        assert!(!ship.systems.sonar_ok);
        assert!(!ship.systems.tubes_ok);

        // Full engineering allocation recovers above the threshold
        ship.power.helm = 0.0;
        ship.power.weapons = 0.0;
        ship.power.sonar = 0.0;
        ship.power.engineering = 1.0;
        for _ in 0..100 {
            step_engineering(&mut ship, 0.05);
        }
        assert!(ship.maintenance.level("rudder") > SYSTEM_FAIL_LEVEL);
        assert!(ship.systems.rudder_ok);
    }

    #[test]
    fn test_starved_engineering_decays_levels() {
        let mut ship = own_ship();
        ship.power.engineering = 0.0;
        let before = ship.maintenance.level("sonar");
        step_engineering(&mut ship, 10.0);
        assert!(ship.maintenance.level("sonar") < before);
    }
}

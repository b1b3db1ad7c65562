//! Property tests for the universal simulation invariants

use proptest::prelude::*;
use serde_json::json;

use triton::ai::orchestrator::Orchestrator;
use triton::assets::{builtin_catalog, spawn_ship};
use triton::config::SimConfig;
use triton::events::EventQueue;
use triton::models::{Kinematics, Side};
use triton::sim::simulation::{OWNSHIP_ID, Simulation};
use triton::sim::weapons::{step_tubes, try_flood_tube, try_load_tube, try_set_doors};
use triton::world::World;

fn quiet_sim(seed: u64) -> Simulation {
    let config = SimConfig {
        seed,
        ..SimConfig::default()
    };
    let mut sim = Simulation::headless(config);
    sim.torpedo_spoofing_enabled = false;
    sim.tasks.suspend_spawn_timers();
    sim
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Depth stays in [0, max_depth] and heading in [0, 360) after
    /// every tick, for any sequence of helm orders.
    #[test]
    fn prop_depth_and_heading_bounds(
        seed in 1u64..10_000,
        orders in prop::collection::vec(
            (0.0f64..720.0, -10.0f64..60.0, -100.0f64..1000.0, 1usize..30),
            1..8,
        ),
    ) {
        let mut sim = quiet_sim(seed);
        for (heading, speed, depth, ticks) in orders {
            let _ = sim.handle_command(
                "helm.order",
                &json!({"heading": heading, "speed": speed, "depth": depth}),
            );
            for _ in 0..ticks {
                sim.tick(0.05);
                let own = sim.world.get_ship(OWNSHIP_ID).unwrap();
                prop_assert!(own.kin.heading >= 0.0 && own.kin.heading < 360.0);
                prop_assert!(own.kin.depth >= 0.0);
                prop_assert!(own.kin.depth <= own.hull.max_depth);
            }
        }
    }

    /// Any allocation the handler accepts sums to at most the budget;
    /// any it rejects leaves the previous allocation untouched.
    #[test]
    fn prop_power_allocation_budget(
        seed in 1u64..10_000,
        helm in 0.0f64..1.0,
        weapons in 0.0f64..1.0,
        sonar in 0.0f64..1.0,
        engineering in 0.0f64..1.0,
    ) {
        let mut sim = quiet_sim(seed);
        let before = sim.world.get_ship(OWNSHIP_ID).unwrap().power.clone();
        let result = sim.handle_command(
            "engineering.power.allocate",
            &json!({
                "helm": helm,
                "weapons": weapons,
                "sonar": sonar,
                "engineering": engineering,
            }),
        );
        let after = sim.world.get_ship(OWNSHIP_ID).unwrap().power.clone();
        match result {
            Ok(()) => prop_assert!(after.total() <= 1.000001),
            Err(_) => {
                prop_assert!((after.helm - before.helm).abs() < 1e-12);
                prop_assert!((after.total() - before.total()).abs() < 1e-12);
            }
        }
    }

    /// A running tube timer always has a pending state, and reaching
    /// zero adopts exactly that state.
    #[test]
    fn prop_tube_timer_next_state(
        ops in prop::collection::vec(0u8..5, 1..40),
    ) {
        let catalog = builtin_catalog();
        let mut ship = spawn_ship(&catalog["SSN"], "ownship", Side::Blue, Kinematics::default());
        for op in ops {
            let pending: Vec<(u32, Option<&'static str>)> = ship
                .weapons
                .tubes
                .iter()
                .map(|t| (t.idx, t.next_state_name()))
                .collect();
            match op {
                0 => { let _ = try_load_tube(&mut ship, 1, "Mk48"); }
                1 => { let _ = try_flood_tube(&mut ship, 1); }
                2 => { let _ = try_set_doors(&mut ship, 1, true); }
                3 => { let _ = try_set_doors(&mut ship, 1, false); }
                _ => {
                    step_tubes(&mut ship, 5.0);
                    // Any tube that finished its transition adopted the
                    // previously pending state.
                    for (idx, next) in &pending {
                        let tube = ship.weapons.tube(*idx).unwrap();
                        if let Some(next) = next {
                            if !tube.busy() {
                                prop_assert_eq!(tube.state.name(), *next);
                            }
                        }
                    }
                }
            }
            for tube in &ship.weapons.tubes {
                // timer > 0 implies a pending next state
                if tube.timer_s() > 0.0 {
                    prop_assert!(tube.next_state_name().is_some());
                } else {
                    prop_assert!(tube.next_state_name().is_none());
                }
            }
        }
    }

    /// Maintenance stages never decrease while a task lives.
    #[test]
    fn prop_task_stage_monotonic(
        seed in 1u64..10_000,
        steps in prop::collection::vec(0.01f64..5.0, 1..60),
    ) {
        use triton::models::{MaintenanceTask, Station, TaskStage};
        let mut sim = quiet_sim(seed);
        sim.tasks.insert_task(MaintenanceTask {
            id: "probe".to_string(),
            station: Station::Sonar,
            system: "sonar".to_string(),
            key: "sonar.hydro.cal".to_string(),
            title: "Hydrophone Calibration".to_string(),
            stage: TaskStage::Task,
            progress: 0.0,
            started: false,
            base_deadline_s: 10.0,
            time_remaining_s: 10.0,
            created_at_s: 0.0,
        });
        let mut last = TaskStage::Task;
        for dt in steps {
            sim.tick(dt);
            let Some(task) = sim
                .tasks
                .tasks(Station::Sonar)
                .iter()
                .find(|t| t.id == "probe")
            else {
                break;
            };
            prop_assert!(task.stage >= last);
            last = task.stage;
        }
    }

    /// A platform without a capability never has that action applied.
    #[test]
    fn prop_capability_gates_hold(
        bearing in 0.0f64..360.0,
        spread in 10.0f64..500.0,
    ) {
        let config = SimConfig::default();
        let mut orch = Orchestrator::new(&config);
        let catalog = builtin_catalog();
        let mut world = World::new();
        world.add_ship(spawn_ship(&catalog["Destroyer"], "dd-01", Side::Red, Kinematics::default()));
        world.add_ship(spawn_ship(&catalog["Convoy"], "cv-01", Side::Red, Kinematics::default()));
        let mut events = EventQueue::new();
        let mut contacts = Vec::new();
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        // Destroyers carry no torpedoes
        let result = orch.apply_tool(
            &mut world, "dd-01", "fire_torpedo",
            &json!({"bearing": bearing}),
            &mut contacts, &mut events, 0.0, &mut rng,
        );
        prop_assert!(result.is_err());
        prop_assert!(world.torpedoes.is_empty());

        // Convoys carry no depth charges and no active sonar
        let result = orch.apply_tool(
            &mut world, "cv-01", "drop_depth_charges",
            &json!({"spread_meters": spread}),
            &mut contacts, &mut events, 0.0, &mut rng,
        );
        prop_assert!(result.is_err());
        prop_assert!(world.depth_charges.is_empty());
        let result = orch.apply_tool(
            &mut world, "cv-01", "active_ping", &json!({}),
            &mut contacts, &mut events, 0.0, &mut rng,
        );
        prop_assert!(result.is_err());
        prop_assert!(contacts.is_empty());
    }
}

/// Ship agent cadence tightens under alert, never the other way
#[test]
fn alerted_cadence_never_slower() {
    let config = SimConfig {
        use_ai_orchestrator: true,
        ..SimConfig::default()
    };
    let orch = Orchestrator::new(&config);
    // No alert: normal cadence
    assert_eq!(orch.effective_ship_cadence("red-01"), config.ai_ship_cadence_s);
    assert!(config.ai_ship_alert_cadence_s <= config.ai_ship_cadence_s);
}

/// Ownship kinematics invariants hold under a full-rate command storm
#[test]
fn invariant_storm_mixed_commands() {
    let mut sim = quiet_sim(5150);
    let commands = [
        ("helm.order", json!({"heading": 359.9, "speed": 40.0, "depth": 5000.0})),
        ("engineering.pump.toggle", json!({"pump": "fwd", "enabled": true})),
        ("captain.periscope.raise", json!({"raised": true})),
        ("helm.order", json!({"heading": -20.0, "speed": 0.0, "depth": -50.0})),
        ("engineering.reactor.scram", json!({"scrammed": true})),
        ("engineering.reactor.set", json!({"mw": 500.0})),
        ("helm.order", json!({"heading": 180.0, "speed": 15.0, "depth": 150.0})),
        ("engineering.reactor.scram", json!({"scrammed": false})),
    ];
    for (i, (topic, payload)) in commands.iter().cycle().take(64).enumerate() {
        let _ = sim.handle_command(topic, payload);
        for _ in 0..(i % 7 + 1) {
            sim.tick(0.05);
            let own = sim.world.get_ship(OWNSHIP_ID).unwrap();
            assert!(own.kin.heading >= 0.0 && own.kin.heading < 360.0);
            assert!(own.kin.depth >= 0.0 && own.kin.depth <= own.hull.max_depth);
            assert!(own.power.total() <= 1.000001);
            assert!(own.reactor.output_mw <= own.reactor.max_mw);
        }
    }
}

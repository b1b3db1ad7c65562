//! The authoritative simulation
//!
//! A single `Simulation` owns the world, the per-station state, and the
//! AI orchestrator, and advances everything in a fixed-rate `tick`.
//! Inbound commands drain from a queue before each tick; orchestrator
//! jobs run concurrently but their effects are serialized back onto the
//! world here. The tick body itself performs no I/O beyond the publish
//! and event-store sinks.

use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

use crate::ai::Orchestrator;
use crate::assets::{
    MissionBrief, MissionConfig, ShipCatalog, apply_mission_to_world, builtin_catalog,
    default_world,
};
use crate::bus::Publisher;
use crate::config::{ConfigHandle, SimConfig};
use crate::events::{EventQueue, TickEvent};
use crate::models::{
    PingResponse, Ship, ShipClass, Side, SonarContact, Station, SyntheticContact,
};
use crate::sim::damage::{PUMP_EFFECT, step_damage, step_engineering};
use crate::sim::noise::{
    CAVITATION_IMPULSE_DB, NoiseEngine, NoiseToggles, StationLevels, dynamic_source_level,
};
use crate::sim::physics::{bearing_to_deg, integrate_kinematics};
use crate::sim::sonar::{
    ActivePingState, active_ping, counter_detection_contacts, gauss, passive_contacts,
};
use crate::sim::tasks::TaskBoard;
use crate::sim::telemetry::{CommsMessage, FrameContext, MAST_DEPTH_M, NavSetpoints};
use crate::sim::visual::VisualDetection;
use crate::sim::weapons::{
    spawn_test_torpedo, step_depth_charge, step_tubes, step_torpedo, try_drop_depth_charges,
    try_fire, try_flood_tube, try_load_tube, try_set_doors,
};
use crate::storage::EventStore;
use crate::world::World;

/// The player boat's id for the life of a session
pub const OWNSHIP_ID: &str = "ownship";
/// Ownship active sonar cooldown (s)
pub const PING_COOLDOWN_S: f64 = 12.0;
/// Counter-detection contacts expire this long after creation (s)
pub const COUNTER_CONTACT_TTL_S: f64 = 5.0;

/// One inbound station command
pub struct Command {
    pub topic: String,
    pub payload: Value,
    /// Optional reply channel carrying the validation result
    pub reply: Option<oneshot::Sender<Result<(), String>>>,
}

/// The authoritative simulation state and tick driver
pub struct Simulation {
    pub config: ConfigHandle,
    pub world: World,
    pub catalog: ShipCatalog,
    pub mission: MissionBrief,
    pub orchestrator: Orchestrator,
    pub tasks: TaskBoard,
    pub visual: VisualDetection,
    /// Torpedo countermeasure spoofing (deterministic tests disable it)
    pub torpedo_spoofing_enabled: bool,

    rng: StdRng,
    bus: Arc<dyn Publisher>,
    store: Arc<dyn EventStore>,
    run_id: String,
    dt: f64,
    sim_time_s: f64,

    ordered: NavSetpoints,
    captain_consent: bool,
    periscope_raised: bool,
    radio_raised: bool,
    pump_fwd: bool,
    pump_aft: bool,

    ping_state: ActivePingState,
    last_ping_responses: Vec<PingResponse>,
    last_ping_at_s: Option<f64>,

    noise_engine: NoiseEngine,
    noise_levels: StationLevels,
    noise_budget: f64,
    emcon_high_timer_s: f64,

    events: EventQueue,
    contacts: Vec<SonarContact>,
    synthetic_contacts: Vec<SyntheticContact>,
    counter_contacts: Vec<SyntheticContact>,

    captain_comms: Vec<CommsMessage>,
    delivered_comms: usize,
    cavitation: bool,
    last_snapshot_s: f64,

    command_tx: mpsc::Sender<Command>,
    command_rx: mpsc::Receiver<Command>,
    stop_flag: Arc<AtomicBool>,
}

impl Simulation {
    pub fn new(
        config: SimConfig,
        bus: Arc<dyn Publisher>,
        store: Arc<dyn EventStore>,
    ) -> Self {
        let seed = if config.seed != 0 {
            config.seed
        } else {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(1)
        };
        let catalog = builtin_catalog();
        let mut world = World::new();
        let mission = default_world(&mut world, &catalog);
        let mut orchestrator = Orchestrator::new(&config);
        orchestrator.inject_mission_brief(mission.clone());
        let run_id = store.create_run();
        let dt = config.dt();
        let (command_tx, command_rx) = mpsc::channel(256);
        let tasks = TaskBoard::new(config.first_task_delay_s);
        info!("Simulation run {} starting (seed {})", run_id, seed);
        Self {
            config: ConfigHandle::new(config, None),
            world,
            catalog,
            mission,
            orchestrator,
            tasks,
            visual: VisualDetection::new(),
            torpedo_spoofing_enabled: true,
            rng: StdRng::seed_from_u64(seed),
            bus,
            store,
            run_id,
            dt,
            sim_time_s: 0.0,
            ordered: NavSetpoints {
                heading: 270.0,
                speed: 8.0,
                depth: 100.0,
            },
            captain_consent: false,
            periscope_raised: false,
            radio_raised: false,
            pump_fwd: false,
            pump_aft: false,
            ping_state: ActivePingState::new(PING_COOLDOWN_S),
            last_ping_responses: Vec::new(),
            last_ping_at_s: None,
            noise_engine: NoiseEngine::new(),
            noise_levels: StationLevels::default(),
            noise_budget: 0.0,
            emcon_high_timer_s: 0.0,
            events: EventQueue::new(),
            contacts: Vec::new(),
            synthetic_contacts: Vec::new(),
            counter_contacts: Vec::new(),
            captain_comms: Vec::new(),
            delivered_comms: 0,
            cavitation: false,
            last_snapshot_s: 0.0,
            command_tx,
            command_rx,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Headless simulation with no bus or storage (tests)
    pub fn headless(config: SimConfig) -> Self {
        Self::new(
            config,
            Arc::new(crate::bus::NullPublisher),
            Arc::new(crate::storage::NullEventStore),
        )
    }

    /// Sender for inbound commands; applied FIFO before the next tick
    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.command_tx.clone()
    }

    /// Handle to release the run loop
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_flag)
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    pub fn sim_time_s(&self) -> f64 {
        self.sim_time_s
    }

    pub fn ping_cooldown_s(&self) -> f64 {
        self.ping_state.timer
    }

    pub fn transient_events(&self) -> &EventQueue {
        &self.events
    }

    pub fn contacts(&self) -> &[SonarContact] {
        &self.contacts
    }

    fn ownship(&self) -> &Ship {
        self.world
            .get_ship(OWNSHIP_ID)
            .expect("ownship exists for the life of the session")
    }

    // ==================== Run loop ====================

    /// Fixed-rate driver: drains commands, then ticks; yields
    /// cooperatively when ahead of the wall clock.
    pub async fn run(&mut self) {
        let mut last = Instant::now();
        while !self.stop_flag.load(Ordering::Relaxed) {
            let now = Instant::now();
            let elapsed = now.duration_since(last).as_secs_f64();
            if elapsed < self.dt {
                tokio::time::sleep(Duration::from_secs_f64(self.dt - elapsed)).await;
                continue;
            }
            last = now;
            self.drain_commands();
            self.tick(self.dt);
        }
        // Cancelled jobs never apply their partial results
        self.orchestrator.stop();
        info!("Simulation run {} stopped", self.run_id);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            let result = self.handle_command(&command.topic, &command.payload);
            if let Some(reply) = command.reply {
                let _ = reply.send(result);
            }
        }
    }

    // ==================== Tick ====================

    /// One simulation step. Ordering is normative; see the phase
    /// comments.
    pub fn tick(&mut self, dt: f64) {
        self.sim_time_s += dt;
        let now_s = self.sim_time_s;

        // (a) Orchestrator: cooldowns, cadence, job scheduling, and
        // application of completed agent runs.
        self.orchestrator.step(
            &mut self.world,
            &self.visual,
            &mut self.counter_contacts,
            &mut self.events,
            self.emcon_high_timer_s,
            now_s,
            dt,
            &mut self.rng,
            self.store.as_ref(),
            &self.run_id,
        );

        // (b) Ownship kinematics toward the ordered setpoints
        let ballast_boost = self.pump_fwd || self.pump_aft;
        let ordered = self.ordered;
        let (cav, _, _, _) = match self.world.get_ship_mut(OWNSHIP_ID) {
            Some(own) => integrate_kinematics(
                own,
                ordered.heading,
                ordered.speed,
                ordered.depth,
                dt,
                ballast_boost,
            ),
            None => (false, 0.0, 0.0, 0.0),
        };
        self.cavitation = cav;

        // (c) Tube and cooldown timers for every ship
        for ship in self.world.all_ships_mut() {
            step_tubes(ship, dt);
        }

        // (d) Non-player ships integrate toward their AI nav orders;
        // frozen when static mode is on and the orchestrator is off.
        let static_enemies =
            self.config.config.enemy_static && !self.orchestrator.enabled;
        if !static_enemies {
            let ids: Vec<String> = self
                .world
                .ship_ids()
                .into_iter()
                .filter(|id| id != OWNSHIP_ID)
                .collect();
            for id in ids {
                let order = self.orchestrator.nav_orders.get(&id).copied();
                if let Some(ship) = self.world.get_ship_mut(&id) {
                    let (heading, speed, depth) = match order {
                        Some(o) => (o.heading, o.speed, o.depth),
                        None => (ship.kin.heading, ship.kin.speed, ship.kin.depth),
                    };
                    integrate_kinematics(ship, heading, speed, depth, dt, false);
                }
            }
        }

        // (e) Ordnance stepping with event callbacks
        let mut torpedoes = std::mem::take(&mut self.world.torpedoes);
        for torpedo in &mut torpedoes {
            step_torpedo(
                torpedo,
                &mut self.world,
                dt,
                &mut self.rng,
                &mut self.events,
                self.torpedo_spoofing_enabled,
            );
        }
        self.world.torpedoes = torpedoes;
        let mut charges = std::mem::take(&mut self.world.depth_charges);
        for charge in &mut charges {
            step_depth_charge(charge, &mut self.world, dt, &mut self.events);
        }
        self.world.depth_charges = charges;
        self.world.sweep_ordnance();

        // (f) Damage and engineering
        let pump_effect = if self.pump_fwd || self.pump_aft {
            PUMP_EFFECT
        } else {
            0.0
        };
        for ship in self.world.all_ships_mut() {
            let effect = if ship.id == OWNSHIP_ID { pump_effect } else { 0.0 };
            step_damage(ship, dt, effect);
            step_engineering(ship, dt);
        }

        // (g) Maintenance tasks with aggregated penalty reapplication
        let maint_spawn_scale = self.config.config.maint_spawn_scale;
        if let Some(own) = self.world.get_ship_mut(OWNSHIP_ID) {
            self.tasks.step(own, dt, now_s, maint_spawn_scale, &mut self.rng);
        }

        // (h) Ownship active-ping cooldown (AI cooldowns tick in (a))
        self.ping_state.tick(dt);

        // (i) Noise budget, EMCON pressure, detectability, and the
        // operation-driven source level.
        self.step_noise(dt, cav);

        // (j) Contact generation: passive picture, projectile and
        // explosion transients, counter-detection expiry.
        self.step_contacts(now_s);

        // (k) Visual detection scan
        self.visual.step(&self.world, now_s, dt, &mut self.rng);

        // (l) Per-station telemetry frames
        self.publish_frames();

        // (m) Flush transients: persist, then clear
        for event in self.events.drain() {
            let payload = serde_json::to_value(&event).unwrap_or(Value::Null);
            self.store.append_event(&self.run_id, event.kind(), payload);
        }

        // (n) Snapshots and scheduled comms
        self.last_snapshot_s += dt;
        if self.last_snapshot_s >= self.config.config.snapshot_s {
            self.last_snapshot_s = 0.0;
            let own = self.ownship();
            self.store.append_snapshot(
                &self.run_id,
                own.kin.heading,
                own.kin.speed,
                own.kin.depth,
            );
        }
        self.deliver_comms();
    }

    fn step_noise(&mut self, dt: f64, cav: bool) {
        let toggles = NoiseToggles {
            periscope_raised: self.periscope_raised,
            radio_raised: self.radio_raised,
            pump_fwd: self.pump_fwd,
            pump_aft: self.pump_aft,
        };
        if cav {
            self.noise_engine
                .add_impulse(Station::Helm, CAVITATION_IMPULSE_DB, 0.5);
        }
        let stage_pairs = self.tasks.stage_pairs();
        let dc_count = self.world.depth_charges.len();
        let own = self.ownship().clone();
        self.noise_levels =
            self.noise_engine
                .tick(&own, toggles, &stage_pairs, dc_count, dt, &mut self.rng);

        let speed_frac = (own.kin.speed / own.hull.max_speed.max(1.0)).clamp(0.0, 1.0);
        let noise_from_speed = (speed_frac * 70.0).min(100.0);
        let noise_cav = if cav { 30.0 } else { 0.0 };
        let noise_pumps = if self.pump_fwd || self.pump_aft { 10.0 } else { 0.0 };
        let noise_masts = if self.periscope_raised { 10.0 } else { 0.0 }
            + if self.radio_raised { 10.0 } else { 0.0 };
        self.noise_budget =
            (noise_from_speed + noise_cav + noise_pumps + noise_masts).clamp(0.0, 100.0);

        if self.noise_budget >= 60.0 {
            self.emcon_high_timer_s = (self.emcon_high_timer_s + dt).min(30.0);
        } else {
            self.emcon_high_timer_s = (self.emcon_high_timer_s - dt).max(0.0);
        }

        let dynamic_sl = dynamic_source_level(&own, &self.noise_levels);
        let mast_bonus = if self.periscope_raised { 2.0 } else { 0.0 }
            + if self.radio_raised { 2.0 } else { 0.0 };
        if let Some(own) = self.world.get_ship_mut(OWNSHIP_ID) {
            own.acoustics.dynamic_source_level_db = dynamic_sl;
            own.acoustics.mast_bonus_db = mast_bonus;
            own.acoustics.last_detectability = self.noise_budget / 100.0;
        }
    }

    fn step_contacts(&mut self, now_s: f64) {
        // Passive picture from ownship, with SNR write-back for debug
        let own = self.ownship().clone();
        let others: Vec<&Ship> = self
            .world
            .all_ships()
            .filter(|s| s.id != OWNSHIP_ID)
            .collect();
        let scan = passive_contacts(&own, &others, &mut self.rng);
        let echoes = scan.echoes;
        self.contacts = scan.contacts;
        for (id, snr, detect) in echoes {
            if let Some(ship) = self.world.get_ship_mut(&id) {
                ship.acoustics.last_snr_db = snr;
                ship.acoustics.last_detectability = detect;
            }
        }

        // Synthetic picture: torpedoes in the water, fresh explosions,
        // and live counter-detections against ownship.
        self.counter_contacts
            .retain(|c| now_s - c.at_s <= COUNTER_CONTACT_TTL_S);
        let mut synthetic = Vec::new();
        if own.systems.sonar_ok {
            for torpedo in &self.world.torpedoes {
                let range = own.kin.range_to_point(torpedo.x, torpedo.y);
                let bearing =
                    bearing_to_deg(own.kin.x, own.kin.y, torpedo.x, torpedo.y);
                synthetic.push(SyntheticContact {
                    observer_id: OWNSHIP_ID.to_string(),
                    contact_id: torpedo.id.clone(),
                    kind: "TORPEDO".to_string(),
                    bearing: (bearing + gauss(&mut self.rng, 2.0)).rem_euclid(360.0),
                    strength: (1.0 / (1.0 + range / 2000.0)).clamp(0.0, 1.0),
                    confidence: 0.6,
                    range_known: false,
                    at_s: now_s,
                });
            }
            for event in self.events.iter() {
                let position = match event {
                    TickEvent::DepthChargeDetonated { x, y, .. } => Some((*x, *y)),
                    TickEvent::TorpedoDetonated { target, .. } => self
                        .world
                        .get_ship(target)
                        .map(|s| (s.kin.x, s.kin.y)),
                    _ => None,
                };
                if let Some((x, y)) = position {
                    let bearing = bearing_to_deg(own.kin.x, own.kin.y, x, y);
                    synthetic.push(SyntheticContact {
                        observer_id: OWNSHIP_ID.to_string(),
                        contact_id: format!("explosion-{}", event.kind()),
                        kind: "EXPLOSION".to_string(),
                        bearing,
                        strength: 1.0,
                        confidence: 1.0,
                        range_known: false,
                        at_s: now_s,
                    });
                }
            }
        }
        synthetic.extend(
            self.counter_contacts
                .iter()
                .filter(|c| c.observer_id == OWNSHIP_ID)
                .cloned(),
        );
        self.synthetic_contacts = synthetic;
    }

    fn publish_frames(&self) {
        let ctx = FrameContext {
            world: &self.world,
            own_id: OWNSHIP_ID,
            ordered: self.ordered,
            cavitation: self.cavitation,
            noise: &self.noise_levels,
            noise_budget: self.noise_budget,
            detectability: self.noise_budget / 100.0,
            emcon_alert: self.emcon_high_timer_s >= 10.0,
            events: &self.events,
            contacts: &self.contacts,
            synthetic_contacts: &self.synthetic_contacts,
            ping_responses: &self.last_ping_responses,
            ping_cooldown_s: self.ping_state.timer,
            last_ping_at_s: self.last_ping_at_s,
            periscope_raised: self.periscope_raised,
            radio_raised: self.radio_raised,
            pump_fwd: self.pump_fwd,
            pump_aft: self.pump_aft,
            captain_consent: self.captain_consent,
            require_captain_consent: self.config.config.require_captain_consent,
            mission: &self.mission,
            comms: &self.captain_comms,
            tasks: &self.tasks,
            intent: &self.orchestrator.intent,
            recent_runs: &self.orchestrator.recent_runs,
            ai_enabled: self.orchestrator.enabled,
            maintenance_spawns_enabled: self.tasks.spawns_enabled,
            visual_force_player: self.visual.force_player,
            visual_force_enemy: self.visual.force_enemy,
            sim_time_s: self.sim_time_s,
        };
        self.bus.publish("tick:all", ctx.frame_all());
        self.bus.publish("tick:captain", ctx.frame_captain());
        self.bus.publish("tick:helm", ctx.frame_helm());
        self.bus.publish("tick:sonar", ctx.frame_sonar());
        self.bus.publish("tick:weapons", ctx.frame_weapons());
        self.bus.publish("tick:engineering", ctx.frame_engineering());
        self.bus.publish("tick:debug", ctx.frame_debug());
        self.bus.publish("tick:fleet", ctx.frame_fleet());
    }

    fn deliver_comms(&mut self) {
        let own = self.ownship();
        let at_radio_depth = own.kin.depth <= MAST_DEPTH_M && self.radio_raised;
        if !at_radio_depth {
            return;
        }
        if let Some(entry) = self.mission.comms_schedule.get(self.delivered_comms) {
            if self.sim_time_s >= entry.at_s {
                self.captain_comms.push(CommsMessage {
                    at_s: self.sim_time_s,
                    text: entry.msg.clone(),
                });
                self.delivered_comms += 1;
            }
        }
    }

    // ==================== World management ====================

    /// Reset to the default two-ship patrol world
    pub fn restart(&mut self) {
        self.mission = default_world(&mut self.world, &self.catalog);
        self.reset_session_state();
        info!("Simulation restarted to default world");
    }

    /// Apply a mission document to the world
    pub fn apply_mission(&mut self, mission: &MissionConfig) {
        self.mission = apply_mission_to_world(mission, &mut self.world, &self.catalog);
        self.reset_session_state();
        info!("Mission '{}' applied", self.mission.title);
    }

    fn reset_session_state(&mut self) {
        self.ordered = NavSetpoints {
            heading: 270.0,
            speed: 8.0,
            depth: 100.0,
        };
        if let Some(own) = self.world.get_ship(OWNSHIP_ID) {
            self.ordered = NavSetpoints {
                heading: own.kin.heading,
                speed: own.kin.speed,
                depth: own.kin.depth,
            };
        }
        self.captain_consent = false;
        self.periscope_raised = false;
        self.radio_raised = false;
        self.pump_fwd = false;
        self.pump_aft = false;
        self.ping_state = ActivePingState::new(PING_COOLDOWN_S);
        self.last_ping_responses.clear();
        self.last_ping_at_s = None;
        self.noise_engine = NoiseEngine::new();
        self.emcon_high_timer_s = 0.0;
        self.contacts.clear();
        self.synthetic_contacts.clear();
        self.counter_contacts.clear();
        self.captain_comms.clear();
        self.delivered_comms = 0;
        self.tasks.reset(self.config.config.first_task_delay_s);
        self.visual.clear();
        self.orchestrator.reset();
        self.orchestrator.inject_mission_brief(self.mission.clone());
    }

    // ==================== Command dispatch ====================

    /// Apply a single station command. Returns `Err` with a
    /// human-readable message when the command is rejected; state is
    /// untouched in that case.
    pub fn handle_command(&mut self, topic: &str, data: &Value) -> Result<(), String> {
        match topic {
            "helm.order" => {
                if let Some(heading) = data.get("heading").and_then(Value::as_f64) {
                    self.ordered.heading = heading.rem_euclid(360.0);
                }
                if let Some(speed) = data.get("speed").and_then(Value::as_f64) {
                    self.ordered.speed = speed.max(0.0);
                }
                if let Some(depth) = data.get("depth").and_then(Value::as_f64) {
                    self.ordered.depth = depth.max(0.0);
                }
                Ok(())
            }
            "sonar.ping" => {
                if !self.ping_state.start() {
                    return Err("Ping on cooldown".to_string());
                }
                let now_s = self.sim_time_s;
                let own = self.ownship().clone();
                let others: Vec<&Ship> = self
                    .world
                    .all_ships()
                    .filter(|s| s.id != OWNSHIP_ID)
                    .collect();
                self.last_ping_responses = active_ping(&own, &others, now_s, &mut self.rng);
                self.last_ping_at_s = Some(now_s);
                // Everyone on the other side hears the ping
                self.counter_contacts.extend(counter_detection_contacts(
                    &own,
                    &self.world,
                    now_s,
                    &mut self.rng,
                ));
                self.events.push(TickEvent::CounterDetected {
                    by: OWNSHIP_ID.to_string(),
                    at_s: now_s,
                });
                Ok(())
            }
            "weapons.tube.load" => {
                let tube = tube_arg(data);
                let weapon = data
                    .get("weapon")
                    .and_then(Value::as_str)
                    .unwrap_or("Mk48")
                    .to_string();
                let own = self.ownship_mut()?;
                try_load_tube(own, tube, &weapon)
            }
            "weapons.tube.flood" => {
                let tube = tube_arg(data);
                let own = self.ownship_mut()?;
                try_flood_tube(own, tube)
            }
            "weapons.tube.doors" => {
                let tube = tube_arg(data);
                let open = data.get("open").and_then(Value::as_bool).unwrap_or(true);
                let own = self.ownship_mut()?;
                try_set_doors(own, tube, open)
            }
            "weapons.fire" => {
                if self.config.config.require_captain_consent && !self.captain_consent {
                    return Err("Captain consent required".to_string());
                }
                let tube = tube_arg(data);
                let own = self.ownship();
                let bearing = data
                    .get("bearing")
                    .and_then(Value::as_f64)
                    .unwrap_or(own.kin.heading);
                let run_depth = data
                    .get("run_depth")
                    .and_then(Value::as_f64)
                    .unwrap_or(own.kin.depth);
                let enable_range = data.get("enable_range").and_then(Value::as_f64);
                let doctrine = data
                    .get("doctrine")
                    .and_then(Value::as_str)
                    .unwrap_or("passive_then_active")
                    .to_string();
                let own = self.ownship_mut()?;
                let torpedo = try_fire(own, tube, bearing, run_depth, enable_range, &doctrine)?;
                self.store.append_event(
                    &self.run_id,
                    "weapons.fire",
                    json!({"tube": tube, "bearing": bearing, "run_depth": run_depth}),
                );
                self.world.torpedoes.push(torpedo);
                Ok(())
            }
            "weapons.test_fire" => {
                let own = self.ownship();
                let bearing = data
                    .get("bearing")
                    .and_then(Value::as_f64)
                    .unwrap_or(own.kin.heading);
                let run_depth = data
                    .get("run_depth")
                    .and_then(Value::as_f64)
                    .unwrap_or(own.kin.depth);
                let enable_range = data
                    .get("enable_range")
                    .and_then(Value::as_f64)
                    .unwrap_or(800.0);
                let torpedo = spawn_test_torpedo(own, bearing, run_depth, enable_range);
                self.world.torpedoes.push(torpedo);
                Ok(())
            }
            "weapons.depth_charges.drop" => {
                let ship_id = data
                    .get("ship_id")
                    .and_then(Value::as_str)
                    .unwrap_or(OWNSHIP_ID)
                    .to_string();
                let spread = data
                    .get("spread_meters")
                    .and_then(Value::as_f64)
                    .unwrap_or(100.0);
                let min_depth = data.get("minDepth").and_then(Value::as_f64).unwrap_or(15.0);
                let max_depth = data.get("maxDepth").and_then(Value::as_f64).unwrap_or(120.0);
                let count = data
                    .get("spreadSize")
                    .and_then(Value::as_u64)
                    .unwrap_or(5) as u32;
                let ship = self
                    .world
                    .get_ship_mut(&ship_id)
                    .ok_or_else(|| "Unknown ship".to_string())?;
                let charges = try_drop_depth_charges(
                    ship,
                    spread,
                    min_depth,
                    max_depth,
                    count,
                    &mut self.rng,
                )?;
                self.events.push(TickEvent::DepthChargesDropped {
                    ship_id,
                    count: charges.len() as u32,
                    spread_m: spread,
                });
                self.world.depth_charges.extend(charges);
                Ok(())
            }
            "engineering.reactor.set" => {
                let own = self.ownship_mut()?;
                let mw = data
                    .get("mw")
                    .and_then(Value::as_f64)
                    .unwrap_or(own.reactor.output_mw)
                    .clamp(0.0, own.reactor.max_mw);
                own.reactor.output_mw = mw;
                Ok(())
            }
            "engineering.reactor.scram" => {
                let scrammed = data.get("scrammed").and_then(Value::as_bool).unwrap_or(true);
                let own = self.ownship_mut()?;
                own.reactor.scrammed = scrammed;
                Ok(())
            }
            "engineering.power.allocate" => {
                let own = self.ownship();
                let helm = data
                    .get("helm")
                    .and_then(Value::as_f64)
                    .unwrap_or(own.power.helm)
                    .max(0.0);
                let weapons = data
                    .get("weapons")
                    .and_then(Value::as_f64)
                    .unwrap_or(own.power.weapons)
                    .max(0.0);
                let sonar = data
                    .get("sonar")
                    .and_then(Value::as_f64)
                    .unwrap_or(own.power.sonar)
                    .max(0.0);
                let engineering = data
                    .get("engineering")
                    .and_then(Value::as_f64)
                    .unwrap_or(own.power.engineering)
                    .max(0.0);
                if helm + weapons + sonar + engineering > 1.000001 {
                    return Err("Allocation exceeds budget".to_string());
                }
                let own = self.ownship_mut()?;
                own.power.helm = helm;
                own.power.weapons = weapons;
                own.power.sonar = sonar;
                own.power.engineering = engineering;
                Ok(())
            }
            "engineering.pump.toggle" => {
                let enabled = data.get("enabled").and_then(Value::as_bool).unwrap_or(true);
                match data.get("pump").and_then(Value::as_str) {
                    Some("fwd") => {
                        self.pump_fwd = enabled;
                        Ok(())
                    }
                    Some("aft") => {
                        self.pump_aft = enabled;
                        Ok(())
                    }
                    _ => Err("Unknown pump".to_string()),
                }
            }
            "station.task.start" => {
                let station = data
                    .get("station")
                    .and_then(Value::as_str)
                    .and_then(Station::parse)
                    .ok_or_else(|| "Unknown station".to_string())?;
                let task_id = data.get("task_id").and_then(Value::as_str);
                let now_s = self.sim_time_s;
                self.tasks.start_task(station, task_id, now_s, &mut self.rng)
            }
            "captain.consent" => {
                self.captain_consent = data
                    .get("consent")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(())
            }
            "captain.periscope.raise" => {
                self.periscope_raised =
                    data.get("raised").and_then(Value::as_bool).unwrap_or(true);
                Ok(())
            }
            "captain.radio.raise" => {
                self.radio_raised = data.get("raised").and_then(Value::as_bool).unwrap_or(true);
                Ok(())
            }
            "ai.tool" => {
                let ship_id = data
                    .get("ship_id")
                    .and_then(Value::as_str)
                    .unwrap_or("red-01")
                    .to_string();
                let tool = data
                    .get("tool")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let args = data.get("arguments").cloned().unwrap_or_else(|| json!({}));
                let now_s = self.sim_time_s;
                self.orchestrator.apply_tool(
                    &mut self.world,
                    &ship_id,
                    &tool,
                    &args,
                    &mut self.counter_contacts,
                    &mut self.events,
                    now_s,
                    &mut self.rng,
                )?;
                self.store.append_event(
                    &self.run_id,
                    "ai.tool.apply",
                    json!({"ship_id": ship_id, "tool": tool, "arguments": args, "manual": true}),
                );
                Ok(())
            }
            "debug.restart" => {
                self.restart();
                Ok(())
            }
            "debug.mission.surface_vessel" => {
                self.restart();
                self.configure_surface_contact();
                self.mission = MissionBrief::surface_vessel_training();
                self.orchestrator.inject_mission_brief(self.mission.clone());
                Ok(())
            }
            "debug.mission1" => {
                // Reposition the RED contact only; world otherwise intact
                self.configure_surface_contact();
                Ok(())
            }
            "debug.maintenance.spawns" => {
                let enabled = data.get("enabled").and_then(Value::as_bool).unwrap_or(true);
                self.tasks.spawns_enabled = enabled;
                Ok(())
            }
            "debug.visual.player_100" => {
                self.visual.force_player =
                    data.get("enabled").and_then(Value::as_bool).unwrap_or(true);
                Ok(())
            }
            "debug.visual.enemy_100" => {
                self.visual.force_enemy =
                    data.get("enabled").and_then(Value::as_bool).unwrap_or(true);
                Ok(())
            }
            "debug.config.reload" => self.config.reload().map(|_| ()),
            _ => Err(format!("Unknown topic {}", topic)),
        }
    }

    fn ownship_mut(&mut self) -> Result<&mut Ship, String> {
        self.world
            .get_ship_mut(OWNSHIP_ID)
            .ok_or_else(|| "Unknown ship".to_string())
    }

    /// Reconfigure the first RED ship as a slow surface convoy contact
    /// at 6 km on an easterly course.
    fn configure_surface_contact(&mut self) {
        let red_id = self
            .world
            .ships_on_side(Side::Red)
            .map(|s| s.id.clone())
            .next();
        let Some(red_id) = red_id else {
            warn!("No RED ship to reconfigure as a surface contact");
            return;
        };
        let convoy = self.catalog.get("Convoy").cloned();
        if let Some(ship) = self.world.get_ship_mut(&red_id) {
            ship.kin.x = 6000.0;
            ship.kin.y = 0.0;
            ship.kin.depth = 3.0;
            ship.kin.heading = 90.0;
            ship.kin.speed = 5.0;
            ship.ship_class = ShipClass::Convoy;
            if let Some(def) = convoy {
                ship.capabilities = def.capabilities.clone();
                ship.hull.max_speed = ship.hull.max_speed.min(def.hull.max_speed);
                ship.acoustics = def.acoustics.clone();
            } else {
                ship.hull.max_speed = ship.hull.max_speed.min(20.0);
            }
        }
    }

    /// Force deterministic RNG state (tests)
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Direct access for scenario assertions
    pub fn noise_budget(&self) -> f64 {
        self.noise_budget
    }

    pub fn emcon_high_timer_s(&self) -> f64 {
        self.emcon_high_timer_s
    }

    pub fn synthetic_contacts(&self) -> &[SyntheticContact] {
        &self.synthetic_contacts
    }

    pub fn counter_contacts(&self) -> &[SyntheticContact] {
        &self.counter_contacts
    }

    pub fn ordered(&self) -> NavSetpoints {
        self.ordered
    }
}

fn tube_arg(data: &Value) -> u32 {
    data.get("tube").and_then(Value::as_u64).unwrap_or(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim() -> Simulation {
        let config = SimConfig {
            seed: 42,
            ..SimConfig::default()
        };
        let mut sim = Simulation::headless(config);
        sim.torpedo_spoofing_enabled = false;
        sim.tasks.suspend_spawn_timers();
        sim
    }

    #[test]
    fn test_helm_order_and_integration() {
        let mut sim = sim();
        sim.handle_command("helm.order", &json!({"heading": 10.0, "speed": 12.0, "depth": 80.0}))
            .unwrap();
        for _ in 0..20 {
            sim.tick(0.05);
        }
        let own = sim.world.get_ship(OWNSHIP_ID).unwrap();
        // Heading slews toward 10 from 270 through north
        assert!(own.kin.heading > 270.0 || own.kin.heading < 10.0);
        assert!(own.kin.depth < 100.0);
    }

    #[test]
    fn test_power_allocation_budget() {
        let mut sim = sim();
        let err = sim
            .handle_command(
                "engineering.power.allocate",
                &json!({"helm": 0.5, "weapons": 0.5, "sonar": 0.3, "engineering": 0.0}),
            )
            .unwrap_err();
        assert!(err.to_lowercase().contains("exceeds"));

        sim.handle_command(
            "engineering.power.allocate",
            &json!({"helm": 0.1, "weapons": 0.2, "sonar": 0.3, "engineering": 0.4}),
        )
        .unwrap();
        let own = sim.world.get_ship(OWNSHIP_ID).unwrap();
        assert!((own.power.helm - 0.1).abs() < 1e-9);
        assert!((own.power.weapons - 0.2).abs() < 1e-9);
        assert!((own.power.sonar - 0.3).abs() < 1e-9);
        assert!((own.power.engineering - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_ping_cooldown_and_counter_detection_event() {
        let mut sim = sim();
        sim.handle_command("sonar.ping", &json!({"array": "bow"})).unwrap();
        assert!(sim.ping_cooldown_s() > 0.0);
        assert!(sim
            .transient_events()
            .iter()
            .any(|e| e.kind() == "counterDetected"));
        // red-01 at 3 km hears the ping
        assert!(sim
            .counter_contacts()
            .iter()
            .any(|c| c.observer_id == "red-01"));

        let err = sim.handle_command("sonar.ping", &json!({})).unwrap_err();
        assert!(err.to_lowercase().contains("cooldown"));
    }

    #[test]
    fn test_fire_requires_consent() {
        let mut sim = sim();
        let err = sim
            .handle_command("weapons.fire", &json!({"tube": 1, "bearing": 90.0}))
            .unwrap_err();
        assert!(err.contains("consent"));

        sim.handle_command("captain.consent", &json!({"consent": true})).unwrap();
        // Tube not prepared: still rejected, but past the consent gate
        let err = sim
            .handle_command("weapons.fire", &json!({"tube": 1, "bearing": 90.0}))
            .unwrap_err();
        assert!(!err.contains("consent"));
    }

    #[test]
    fn test_test_fire_bypasses_tubes() {
        let mut sim = sim();
        sim.handle_command(
            "weapons.test_fire",
            &json!({"bearing": 90.0, "run_depth": 50.0, "enable_range": 400.0}),
        )
        .unwrap();
        assert_eq!(sim.world.torpedoes.len(), 1);
        assert_eq!(sim.world.torpedoes[0].enable_range_m, 400.0);
    }

    #[test]
    fn test_surface_vessel_mission_reconfigures_red() {
        let mut sim = sim();
        sim.handle_command("debug.mission.surface_vessel", &json!({})).unwrap();
        let red = sim.world.get_ship("red-01").unwrap();
        assert_eq!(red.kin.depth, 3.0);
        assert_eq!(red.ship_class, ShipClass::Convoy);
        assert_eq!(red.kin.x, 6000.0);
        assert_eq!(sim.mission.title, "Surface Vessel Intercept (Training)");
    }

    #[test]
    fn test_unknown_topic_rejected() {
        let mut sim = sim();
        assert!(sim.handle_command("galley.coffee", &json!({})).is_err());
    }

    #[test]
    fn test_restart_resets_world_and_toggles() {
        let mut sim = sim();
        sim.handle_command("captain.periscope.raise", &json!({"raised": true})).unwrap();
        sim.handle_command("helm.order", &json!({"heading": 0.0, "speed": 20.0})).unwrap();
        for _ in 0..40 {
            sim.tick(0.05);
        }
        sim.handle_command("debug.restart", &json!({})).unwrap();
        let own = sim.world.get_ship(OWNSHIP_ID).unwrap();
        assert_eq!(own.kin.heading, 270.0);
        assert_eq!(own.kin.depth, 100.0);
        assert_eq!(sim.ordered().heading, 270.0);
        assert!(!sim.periscope_raised);
    }

    #[test]
    fn test_counter_contacts_expire() {
        let mut sim = sim();
        sim.handle_command("sonar.ping", &json!({})).unwrap();
        assert!(!sim.counter_contacts().is_empty());
        for _ in 0..((COUNTER_CONTACT_TTL_S / 0.05) as usize + 5) {
            sim.tick(0.05);
        }
        assert!(sim.counter_contacts().is_empty());
    }

    #[test]
    fn test_tick_keeps_invariants() {
        let mut sim = sim();
        sim.handle_command("helm.order", &json!({"heading": 725.0, "speed": 50.0, "depth": 900.0}))
            .unwrap();
        for _ in 0..200 {
            sim.tick(0.05);
            let own = sim.world.get_ship(OWNSHIP_ID).unwrap();
            assert!(own.kin.heading >= 0.0 && own.kin.heading < 360.0);
            assert!(own.kin.depth >= 0.0 && own.kin.depth <= own.hull.max_depth);
        }
    }

    #[tokio::test]
    async fn test_command_queue_applies_before_tick() {
        let mut sim = sim();
        let sender = sim.command_sender();
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(Command {
                topic: "captain.consent".to_string(),
                payload: json!({"consent": true}),
                reply: Some(reply_tx),
            })
            .await
            .unwrap();
        sim.drain_commands();
        assert!(reply_rx.await.unwrap().is_ok());
        assert!(sim.captain_consent);
    }
}

//! The two-tier AI orchestrator
//!
//! Schedules fleet and per-ship agent runs on decoupled cadences,
//! tightening both when contacts or emissions raise the alert state.
//! Each run spawns a bounded async job against the configured engine;
//! results come back over a completion channel and are validated and
//! applied on the tick executor only. Unknown tools fall back to
//! intent-derived navigation; failures become errored run records with
//! no side effects.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::assets::MissionBrief;
use crate::config::SimConfig;
use crate::events::{EventQueue, TickEvent};
use crate::models::{
    EmconPolicy, FleetIntent, IntentNote, Ship, ShipClass, ShipObjective, Side, SyntheticContact,
};
use crate::sim::physics::bearing_to_deg;
use crate::sim::sonar::{ActivePingState, counter_detection_contacts, passive_contacts};
use crate::sim::visual::VisualDetection;
use crate::sim::weapons::{try_drop_depth_charges, try_launch_torpedo_quick};
use crate::storage::EventStore;
use crate::world::World;

use super::engines::{
    EngineFailure, EngineKind, EngineResponse, LlmEngine, OllamaEngine, OpenAiEngine, StubEngine,
};
use super::summary;

/// Tools a ship agent may invoke
const SHIP_TOOLS: [&str; 6] = [
    "set_nav",
    "fire_torpedo",
    "launch_torpedo_quick",
    "deploy_countermeasure",
    "drop_depth_charges",
    "active_ping",
];

/// Active sonar cooldown applied to AI ships (s)
const AI_PING_COOLDOWN_S: f64 = 12.0;
/// Range at which sustained enemy emissions alert a ship (m)
const ALERT_RANGE_M: f64 = 7000.0;
/// Sustained EMCON-high time that triggers ship alerts (s)
const ALERT_EMCON_SUSTAIN_S: f64 = 10.0;

/// Navigation setpoints ordered for an AI ship; the tick loop slews the
/// ship toward these.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NavOrder {
    pub heading: f64,
    pub speed: f64,
    pub depth: f64,
}

/// One recorded agent run, surfaced in the fleet frame
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ship_id: Option<String>,
    pub provider: String,
    pub model: String,
    pub ok: bool,
    pub source: String,
    pub at_s: f64,
    pub duration_ms: u64,
    pub tool_calls: Vec<Value>,
    pub tool_calls_validated: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_meta: Option<Value>,
}

/// Completion of one async engine job
struct JobOutcome {
    ship_id: Option<String>,
    result: Result<EngineResponse, EngineFailure>,
    duration_ms: u64,
}

fn engine_from_config(kind: &str, model: &str, config: &SimConfig) -> Arc<dyn LlmEngine> {
    match EngineKind::parse(kind) {
        EngineKind::Stub => Arc::new(StubEngine),
        EngineKind::Ollama => Arc::new(OllamaEngine::new(
            model.to_string(),
            config.ollama_host.clone(),
        )),
        EngineKind::OpenAi => Arc::new(OpenAiEngine::new(
            model.to_string(),
            config.openai_api_key.clone().unwrap_or_default(),
            config.openai_base_url.clone(),
        )),
    }
}

/// Fleet planner plus per-ship captains with validation and fallback
pub struct Orchestrator {
    pub enabled: bool,
    fleet_engine: Arc<dyn LlmEngine>,
    ship_engine: Arc<dyn LlmEngine>,
    http_timeout_s: f64,
    fleet_cadence_s: f64,
    fleet_alert_cadence_s: f64,
    ship_cadence_s: f64,
    ship_alert_cadence_s: f64,
    trigger_conf_threshold: f64,

    fleet_timer_s: f64,
    ship_timers: BTreeMap<String, f64>,
    /// Sticky fleet alert window end, in sim time
    fleet_alert_until_s: f64,
    ship_alert: BTreeMap<String, bool>,
    ping_states: BTreeMap<String, ActivePingState>,

    /// The current normalized fleet plan
    pub intent: FleetIntent,
    intent_history: VecDeque<Value>,
    pub recent_runs: VecDeque<RunRecord>,
    contact_history: VecDeque<crate::models::ContactEvent>,
    contacts_history_by_ship: BTreeMap<String, VecDeque<Value>>,
    orders_last_by_ship: BTreeMap<String, Value>,
    pub nav_orders: BTreeMap<String, NavOrder>,
    mission: MissionBrief,
    run_log_path: Option<PathBuf>,

    jobs: Vec<JoinHandle<()>>,
    tx: mpsc::Sender<JobOutcome>,
    rx: mpsc::Receiver<JobOutcome>,
}

impl Orchestrator {
    pub fn new(config: &SimConfig) -> Self {
        Self::with_engines(
            engine_from_config(&config.ai_fleet_engine, &config.ai_fleet_model, config),
            engine_from_config(&config.ai_ship_engine, &config.ai_ship_model, config),
            config,
        )
    }

    /// Construct with explicit engines (tests inject mocks here)
    pub fn with_engines(
        fleet_engine: Arc<dyn LlmEngine>,
        ship_engine: Arc<dyn LlmEngine>,
        config: &SimConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            enabled: config.use_ai_orchestrator,
            fleet_engine,
            ship_engine,
            http_timeout_s: config.ai_http_timeout_s,
            fleet_cadence_s: config.ai_fleet_cadence_s,
            fleet_alert_cadence_s: config.ai_fleet_alert_cadence_s,
            ship_cadence_s: config.ai_ship_cadence_s,
            ship_alert_cadence_s: config.ai_ship_alert_cadence_s,
            trigger_conf_threshold: config.ai_fleet_trigger_conf_threshold,
            fleet_timer_s: config.ai_fleet_cadence_s,
            ship_timers: BTreeMap::new(),
            fleet_alert_until_s: 0.0,
            ship_alert: BTreeMap::new(),
            ping_states: BTreeMap::new(),
            intent: FleetIntent::default(),
            intent_history: VecDeque::new(),
            recent_runs: VecDeque::new(),
            contact_history: VecDeque::new(),
            contacts_history_by_ship: BTreeMap::new(),
            orders_last_by_ship: BTreeMap::new(),
            nav_orders: BTreeMap::new(),
            mission: MissionBrief::default(),
            run_log_path: config.ai_run_log_path.clone().map(PathBuf::from),
            jobs: Vec::new(),
            tx,
            rx,
        }
    }

    /// Hand the orchestrator the active mission brief
    pub fn inject_mission_brief(&mut self, brief: MissionBrief) {
        self.mission = brief;
    }

    /// Reset volatile state on restart/mission swap
    pub fn reset(&mut self) {
        self.stop();
        self.fleet_timer_s = self.fleet_cadence_s;
        self.ship_timers.clear();
        self.fleet_alert_until_s = 0.0;
        self.ship_alert.clear();
        self.ping_states.clear();
        self.intent = FleetIntent::default();
        self.intent_history.clear();
        self.contact_history.clear();
        self.contacts_history_by_ship.clear();
        self.orders_last_by_ship.clear();
        self.nav_orders.clear();
    }

    /// Cancel in-flight jobs and discard their results
    pub fn stop(&mut self) {
        for job in self.jobs.drain(..) {
            job.abort();
        }
        while self.rx.try_recv().is_ok() {}
    }

    /// Whether a ship currently holds an alert state
    pub fn ship_alerted(&self, ship_id: &str) -> bool {
        self.ship_alert.get(ship_id).copied().unwrap_or(false)
    }

    /// Cadence a ship's agent currently runs at
    pub fn effective_ship_cadence(&self, ship_id: &str) -> f64 {
        if self.ship_alerted(ship_id) {
            self.ship_alert_cadence_s
        } else {
            self.ship_cadence_s
        }
    }

    fn effective_fleet_cadence(&self, now_s: f64) -> f64 {
        if now_s < self.fleet_alert_until_s {
            self.fleet_alert_cadence_s
        } else {
            self.fleet_cadence_s
        }
    }

    /// Remaining active-ping cooldown for an AI ship
    pub fn ai_ping_cooldown(&self, ship_id: &str) -> f64 {
        self.ping_states.get(ship_id).map(|s| s.timer).unwrap_or(0.0)
    }

    // ==================== Per-tick driver ====================

    /// One orchestrator pass: cooldowns, alert states, run scheduling,
    /// and application of any completed jobs.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        world: &mut World,
        visual: &VisualDetection,
        counter_contacts: &mut Vec<SyntheticContact>,
        events: &mut EventQueue,
        emcon_high_s: f64,
        now_s: f64,
        dt: f64,
        rng: &mut StdRng,
        store: &dyn EventStore,
        run_id: &str,
    ) {
        for state in self.ping_states.values_mut() {
            state.tick(dt);
        }
        self.jobs.retain(|j| !j.is_finished());
        self.update_alerts(world, visual, emcon_high_s, now_s, rng);

        if self.enabled {
            self.fleet_timer_s -= dt;
            if self.fleet_timer_s <= 0.0 {
                self.fleet_timer_s = self.effective_fleet_cadence(now_s);
                self.schedule_fleet(world, visual, now_s, rng);
            }

            let red_ids: Vec<String> = world
                .ships_on_side(Side::Red)
                .map(|s| s.id.clone())
                .collect();
            for ship_id in red_ids {
                let mut timer = self
                    .ship_timers
                    .get(&ship_id)
                    .copied()
                    .unwrap_or(self.ship_cadence_s);
                timer -= dt;
                if timer <= 0.0 {
                    timer = self.effective_ship_cadence(&ship_id);
                    self.schedule_ship(&ship_id, world, visual, now_s, rng);
                }
                self.ship_timers.insert(ship_id, timer);
            }
        }

        self.drain_outcomes(world, counter_contacts, events, now_s, rng, store, run_id);
    }

    fn update_alerts(
        &mut self,
        world: &World,
        visual: &VisualDetection,
        emcon_high_s: f64,
        now_s: f64,
        rng: &mut StdRng,
    ) {
        let blue_ships: Vec<&Ship> = world.ships_on_side(Side::Blue).collect();
        let mut fleet_triggered = false;
        let mut alerts = BTreeMap::new();
        for red in world.ships_on_side(Side::Red) {
            let scan = passive_contacts(red, &blue_ships, rng);
            let mut observed = scan
                .contacts
                .iter()
                .any(|c| c.confidence >= self.trigger_conf_threshold);
            for blue in &blue_ships {
                if visual.is_contact(red, blue, now_s) {
                    let conf = visual
                        .entry(&red.id, &blue.id)
                        .map(|e| e.last_confidence)
                        .unwrap_or(0.7);
                    observed |= conf >= self.trigger_conf_threshold;
                }
            }
            fleet_triggered |= observed;

            let pinged_recently = self.ai_ping_cooldown(&red.id) > 0.0;
            let emissions_close = emcon_high_s >= ALERT_EMCON_SUSTAIN_S
                && blue_ships
                    .iter()
                    .any(|b| red.kin.range_to(&b.kin) <= ALERT_RANGE_M);
            alerts.insert(red.id.clone(), pinged_recently || emissions_close);
        }
        if fleet_triggered {
            // Sticky for one alert cadence window beyond the trigger
            self.fleet_alert_until_s = now_s + self.fleet_alert_cadence_s;
        }
        self.ship_alert = alerts;
    }

    // ==================== Summaries ====================

    fn intent_hash(&self) -> String {
        let body = serde_json::to_string(&self.intent).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        body.hash(&mut hasher);
        format!("{:08x}", hasher.finish() as u32)
    }

    /// Fleet commander's bounded view of the engagement
    pub fn build_fleet_summary(
        &mut self,
        world: &World,
        visual: &VisualDetection,
        now_s: f64,
        rng: &mut StdRng,
    ) -> Value {
        let own_fleet: Vec<Value> = world
            .ships_on_side(Side::Red)
            .map(summary::fleet_ship_projection)
            .collect();
        let (enemy_belief, history_events) =
            summary::red_contact_picture(world, visual, now_s, rng);
        for event in history_events {
            self.contact_history.push_back(event);
            while self.contact_history.len() > 100 {
                self.contact_history.pop_front();
            }
        }
        let ship_last_runs: Vec<Value> = {
            let mut last_by_ship: BTreeMap<String, Value> = BTreeMap::new();
            for run in &self.recent_runs {
                if let Some(ship_id) = &run.ship_id {
                    last_by_ship.insert(
                        ship_id.clone(),
                        json!({
                            "ship_id": ship_id,
                            "summary": run.summary,
                            "tool_calls": run.tool_calls_validated,
                        }),
                    );
                }
            }
            last_by_ship.into_values().collect()
        };
        let last_fleet_summary = self
            .recent_runs
            .iter()
            .rev()
            .find(|r| r.agent == "fleet" && r.summary.is_some())
            .and_then(|r| r.summary.clone())
            .unwrap_or_default();
        let result = json!({
            "time_s": now_s,
            "own_fleet": own_fleet,
            "enemy_belief": enemy_belief,
            "mission": summary::mission_block(&self.mission, world),
            "fleet_intent_last": {
                "hash": self.intent_hash(),
                "body": &self.intent,
                "summary": last_fleet_summary,
            },
            "fleet_intent_history": self.intent_history.iter().collect::<Vec<_>>(),
            "ship_last_runs": ship_last_runs,
            "orders_last_by_ship": &self.orders_last_by_ship,
            "contact_history": self.contact_history.iter().collect::<Vec<_>>(),
        });
        summary::round_floats(&result, 1)
    }

    /// A single RED ship's bounded view
    pub fn build_ship_summary(
        &mut self,
        ship_id: &str,
        world: &World,
        visual: &VisualDetection,
        now_s: f64,
        rng: &mut StdRng,
    ) -> Option<Value> {
        let ship = world.get_ship(ship_id)?;
        let local_contacts = summary::ship_local_contacts(ship, world, visual, now_s, rng);
        let fused = summary::fleet_fused_contacts(ship, &self.intent.notes);
        let alert = self.ship_alerted(ship_id);
        let orders_last = self.orders_last_by_ship.get(ship_id).cloned();

        let history = self
            .contacts_history_by_ship
            .entry(ship_id.to_string())
            .or_default();
        for contact in &local_contacts {
            history.push_back(json!({
                "time_s": now_s,
                "id": contact.get("id"),
                "bearing": contact.get("bearing"),
                "range_est": contact.get("range_est"),
                "class": contact.get("class"),
                "confidence": contact.get("confidence"),
            }));
            while history.len() > 6 {
                history.pop_front();
            }
        }
        let history_snapshot: Vec<Value> = history.iter().cloned().collect();

        let mut result = summary::ship_self_blocks(ship);
        let extras = json!({
            "contacts": local_contacts,
            "fleet_fused_contacts": fused,
            "contacts_history": history_snapshot,
            "orders_last": orders_last,
            "fleet_intent": &self.intent,
            "detected_state": {"alert": alert},
        });
        if let (Some(obj), Some(extra)) = (result.as_object_mut(), extras.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        Some(summary::round_floats(&result, 1))
    }

    // ==================== Scheduling ====================

    fn schedule_fleet(
        &mut self,
        world: &World,
        visual: &VisualDetection,
        now_s: f64,
        rng: &mut StdRng,
    ) {
        let summary = self.build_fleet_summary(world, visual, now_s, rng);
        let engine = Arc::clone(&self.fleet_engine);
        let tx = self.tx.clone();
        let timeout = Duration::from_secs_f64(self.http_timeout_s.max(1.0));
        debug!("Scheduling fleet agent run");
        self.jobs.push(tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = match tokio::time::timeout(timeout, engine.propose_fleet_intent(&summary))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(EngineFailure {
                    error: format!("fleet engine timed out after {:.0?}", timeout),
                    provider_meta: None,
                }),
            };
            let _ = tx
                .send(JobOutcome {
                    ship_id: None,
                    result,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
                .await;
        }));
    }

    fn schedule_ship(
        &mut self,
        ship_id: &str,
        world: &World,
        visual: &VisualDetection,
        now_s: f64,
        rng: &mut StdRng,
    ) {
        // Policy: a stub ship engine never acts; record it for clarity
        if self.ship_engine.kind() == EngineKind::Stub {
            self.push_run(RunRecord {
                agent: "ship".to_string(),
                ship_id: Some(ship_id.to_string()),
                provider: "stub".to_string(),
                model: self.ship_engine.model().to_string(),
                ok: false,
                source: "disabled_stub".to_string(),
                at_s: now_s,
                duration_ms: 0,
                tool_calls: Vec::new(),
                tool_calls_validated: Vec::new(),
                summary: None,
                error: Some("ship engine 'stub' disabled by policy".to_string()),
                provider_meta: None,
            });
            return;
        }
        let Some(summary) = self.build_ship_summary(ship_id, world, visual, now_s, rng) else {
            return;
        };
        let behavior = self.mission.ship_behaviors.get(ship_id).cloned();
        let engine = Arc::clone(&self.ship_engine);
        let tx = self.tx.clone();
        let timeout = Duration::from_secs_f64(self.http_timeout_s.max(1.0));
        let ship_id = ship_id.to_string();
        debug!("Scheduling ship agent run for {}", ship_id);
        self.jobs.push(tokio::spawn(async move {
            let started = std::time::Instant::now();
            let call = engine.propose_ship_tool(&summary, behavior.as_deref());
            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(EngineFailure {
                    error: format!("ship engine timed out after {:.0?}", timeout),
                    provider_meta: None,
                }),
            };
            let _ = tx
                .send(JobOutcome {
                    ship_id: Some(ship_id),
                    result,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
                .await;
        }));
    }

    // ==================== Application ====================

    #[allow(clippy::too_many_arguments)]
    fn drain_outcomes(
        &mut self,
        world: &mut World,
        counter_contacts: &mut Vec<SyntheticContact>,
        events: &mut EventQueue,
        now_s: f64,
        rng: &mut StdRng,
        store: &dyn EventStore,
        run_id: &str,
    ) {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.rx.try_recv() {
            outcomes.push(outcome);
        }
        if outcomes.is_empty() {
            return;
        }
        // Fleet results apply before ship results within the same tick
        outcomes.sort_by_key(|o| o.ship_id.is_some());
        for outcome in outcomes {
            match outcome.ship_id.clone() {
                None => self.apply_fleet_outcome(outcome, world, now_s, store, run_id),
                Some(ship_id) => self.apply_ship_outcome(
                    &ship_id,
                    outcome,
                    world,
                    counter_contacts,
                    events,
                    now_s,
                    rng,
                    store,
                    run_id,
                ),
            }
        }
    }

    fn apply_fleet_outcome(
        &mut self,
        outcome: JobOutcome,
        world: &World,
        now_s: f64,
        store: &dyn EventStore,
        run_id: &str,
    ) {
        let provider = self.fleet_engine.kind().name().to_string();
        let model = self.fleet_engine.model().to_string();
        match outcome.result {
            Ok(response) => {
                let intent = self.normalize_intent(&response.value, world);
                let summary_line = intent.summary.clone();
                self.intent_history.push_back(json!({
                    "hash": self.intent_hash(),
                    "body": &intent,
                    "summary": summary_line.clone(),
                    "at_s": now_s,
                }));
                while self.intent_history.len() > 8 {
                    self.intent_history.pop_front();
                }
                let tool_call = json!({"tool": "set_fleet_intent", "arguments": &intent});
                self.intent = intent;
                info!("Fleet intent applied: {}", summary_line);
                store.append_event(run_id, "ai.run.fleet", json!({"model": model.clone(), "ok": true}));
                store.append_event(run_id, "ai.tool.fleet", tool_call.clone());
                self.push_run(RunRecord {
                    agent: "fleet".to_string(),
                    ship_id: None,
                    provider,
                    model,
                    ok: true,
                    source: "llm".to_string(),
                    at_s: now_s,
                    duration_ms: outcome.duration_ms,
                    tool_calls: vec![tool_call.clone()],
                    tool_calls_validated: vec![tool_call],
                    summary: Some(summary_line),
                    error: None,
                    provider_meta: response.provider_meta,
                });
            }
            Err(failure) => {
                warn!("Fleet agent run failed: {}", failure.error);
                store.append_event(
                    run_id,
                    "ai.run.fleet",
                    json!({"model": model.clone(), "ok": false, "error": failure.error.clone()}),
                );
                self.push_run(RunRecord {
                    agent: "fleet".to_string(),
                    ship_id: None,
                    provider,
                    model,
                    ok: false,
                    source: "llm".to_string(),
                    at_s: now_s,
                    duration_ms: outcome.duration_ms,
                    tool_calls: Vec::new(),
                    tool_calls_validated: Vec::new(),
                    summary: None,
                    error: Some(failure.error),
                    provider_meta: failure.provider_meta,
                });
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_ship_outcome(
        &mut self,
        ship_id: &str,
        outcome: JobOutcome,
        world: &mut World,
        counter_contacts: &mut Vec<SyntheticContact>,
        events: &mut EventQueue,
        now_s: f64,
        rng: &mut StdRng,
        store: &dyn EventStore,
        run_id: &str,
    ) {
        let provider = self.ship_engine.kind().name().to_string();
        let model = self.ship_engine.model().to_string();
        let mut record = RunRecord {
            agent: "ship".to_string(),
            ship_id: Some(ship_id.to_string()),
            provider,
            model: model.clone(),
            ok: false,
            source: "llm".to_string(),
            at_s: now_s,
            duration_ms: outcome.duration_ms,
            tool_calls: Vec::new(),
            tool_calls_validated: Vec::new(),
            summary: None,
            error: None,
            provider_meta: None,
        };
        match outcome.result {
            Ok(response) => {
                record.provider_meta = response.provider_meta.clone();
                record.tool_calls = vec![response.value.clone()];
                let tool_name = response
                    .value
                    .get("tool")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if SHIP_TOOLS.contains(&tool_name.as_str()) {
                    let args = response
                        .value
                        .get("arguments")
                        .cloned()
                        .unwrap_or_else(|| json!({}));
                    match self.apply_tool(
                        world,
                        ship_id,
                        &tool_name,
                        &args,
                        counter_contacts,
                        events,
                        now_s,
                        rng,
                    ) {
                        Ok(()) => {
                            record.ok = true;
                            record.tool_calls_validated = vec![response.value.clone()];
                            let summary_text = response
                                .value
                                .get("summary")
                                .and_then(Value::as_str)
                                .map(str::to_string);
                            if summary_text.is_none() {
                                record.error = Some("missing summary; auto-generated".to_string());
                            }
                            record.summary = summary_text.or_else(|| {
                                Some(format!("{}: {}", ship_id, tool_name))
                            });
                        }
                        Err(e) => {
                            record.error = Some(e);
                        }
                    }
                } else {
                    // Unknown tool: fall back to intent-derived navigation
                    match self.intent_fallback_nav(ship_id, world) {
                        Some(nav_call) => {
                            record.source = "intent_fallback".to_string();
                            record.error =
                                Some("Unknown tool; applied intent-derived navigation".to_string());
                            record.tool_calls_validated = vec![nav_call.clone()];
                            record.summary = Some(format!(
                                "{}: intent-derived navigation fallback",
                                ship_id
                            ));
                            let args = nav_call["arguments"].clone();
                            if let Err(e) = self.apply_tool(
                                world,
                                ship_id,
                                "set_nav",
                                &args,
                                counter_contacts,
                                events,
                                now_s,
                                rng,
                            ) {
                                record.error = Some(e);
                            }
                        }
                        None => {
                            record.source = "none".to_string();
                            record.error =
                                Some("Unknown tool returned by engine; no action applied".to_string());
                        }
                    }
                }
                store.append_event(
                    run_id,
                    "ai.run.ship",
                    json!({"ship_id": ship_id, "model": model, "ok": record.ok, "source": record.source.clone()}),
                );
                if !record.tool_calls_validated.is_empty() {
                    store.append_event(
                        run_id,
                        "ai.tool.apply",
                        json!({"ship_id": ship_id, "tool_calls": record.tool_calls_validated.clone()}),
                    );
                    self.orders_last_by_ship.insert(
                        ship_id.to_string(),
                        record.tool_calls_validated[0].clone(),
                    );
                }
            }
            Err(failure) => {
                warn!("Ship agent run for {} failed: {}", ship_id, failure.error);
                record.error = Some(failure.error);
                record.provider_meta = failure.provider_meta;
                store.append_event(
                    run_id,
                    "ai.run.ship",
                    json!({"ship_id": ship_id, "model": model, "ok": false, "error": record.error.clone()}),
                );
            }
        }
        self.push_run(record);
    }

    /// Validated tool application; also the entry point for the manual
    /// `ai.tool` debug command. Capability checks gate every action.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_tool(
        &mut self,
        world: &mut World,
        ship_id: &str,
        tool: &str,
        args: &Value,
        counter_contacts: &mut Vec<SyntheticContact>,
        events: &mut EventQueue,
        now_s: f64,
        rng: &mut StdRng,
    ) -> Result<(), String> {
        let ship = world
            .get_ship(ship_id)
            .ok_or_else(|| "Unknown ship".to_string())?;
        let caps = ship.capabilities.clone();
        match tool {
            "set_nav" => {
                if !caps.can_set_nav {
                    return Err("Tool not supported".to_string());
                }
                let ship = world.get_ship_mut(ship_id).expect("checked above");
                let heading = args
                    .get("heading")
                    .and_then(Value::as_f64)
                    .unwrap_or(ship.kin.heading)
                    .rem_euclid(360.0);
                let speed = args
                    .get("speed")
                    .and_then(Value::as_f64)
                    .unwrap_or(ship.kin.speed)
                    .clamp(0.0, ship.hull.max_speed);
                let depth = args
                    .get("depth")
                    .and_then(Value::as_f64)
                    .unwrap_or(ship.kin.depth)
                    .clamp(0.0, ship.hull.max_depth);
                self.nav_orders
                    .insert(ship_id.to_string(), NavOrder { heading, speed, depth });
                Ok(())
            }
            "fire_torpedo" | "launch_torpedo_quick" => {
                if !caps.has_torpedoes {
                    return Err("Tool not supported".to_string());
                }
                let ship = world.get_ship_mut(ship_id).expect("checked above");
                let bearing = args
                    .get("bearing")
                    .and_then(Value::as_f64)
                    .unwrap_or(ship.kin.heading);
                let run_depth = args
                    .get("run_depth")
                    .and_then(Value::as_f64)
                    .unwrap_or(ship.kin.depth);
                let enable_range = args.get("enable_range").and_then(Value::as_f64).unwrap_or(800.0);
                let doctrine = args
                    .get("doctrine")
                    .and_then(Value::as_str)
                    .unwrap_or("passive_then_active");
                let torpedo = try_launch_torpedo_quick(
                    ship,
                    bearing,
                    run_depth,
                    Some(enable_range),
                    doctrine,
                )?;
                events.push(TickEvent::TorpedoQuickLaunched {
                    ship_id: ship_id.to_string(),
                    bearing,
                    run_depth,
                });
                world.torpedoes.push(torpedo);
                Ok(())
            }
            "drop_depth_charges" => {
                if !caps.has_depth_charges {
                    return Err("Tool not supported".to_string());
                }
                let spread_m = args
                    .get("spread_meters")
                    .and_then(Value::as_f64)
                    .unwrap_or(100.0)
                    .clamp(10.0, 1000.0);
                let min_depth = args
                    .get("minDepth")
                    .and_then(Value::as_f64)
                    .unwrap_or(15.0)
                    .clamp(0.0, 500.0);
                let max_depth = args
                    .get("maxDepth")
                    .and_then(Value::as_f64)
                    .unwrap_or(120.0)
                    .clamp(min_depth, 500.0);
                let count = args
                    .get("spreadSize")
                    .and_then(Value::as_u64)
                    .unwrap_or(5)
                    .clamp(1, 10) as u32;
                let ship = world.get_ship_mut(ship_id).expect("checked above");
                let charges =
                    try_drop_depth_charges(ship, spread_m, min_depth, max_depth, count, rng)?;
                events.push(TickEvent::DepthChargesDropped {
                    ship_id: ship_id.to_string(),
                    count: charges.len() as u32,
                    spread_m,
                });
                world.depth_charges.extend(charges);
                Ok(())
            }
            "deploy_countermeasure" => {
                let cm_type = args.get("type").and_then(Value::as_str).unwrap_or_default();
                if !caps.countermeasures.iter().any(|c| c == cm_type) {
                    return Err("Tool not supported".to_string());
                }
                // Accepted; the launcher itself is not modeled
                Ok(())
            }
            "active_ping" => {
                if !caps.has_active_sonar {
                    return Err("Tool not supported".to_string());
                }
                let state = self
                    .ping_states
                    .entry(ship_id.to_string())
                    .or_insert_with(|| ActivePingState::new(AI_PING_COOLDOWN_S));
                if !state.start() {
                    return Err("Ping on cooldown".to_string());
                }
                let pinger = world.get_ship(ship_id).expect("checked above").clone();
                counter_contacts.extend(counter_detection_contacts(&pinger, world, now_s, rng));
                events.push(TickEvent::CounterDetected {
                    by: ship_id.to_string(),
                    at_s: now_s,
                });
                Ok(())
            }
            _ => Err("Unknown tool".to_string()),
        }
    }

    /// Intent-derived navigation used when an engine returns an unknown
    /// tool: steer toward the ship's FleetIntent destination.
    pub fn intent_fallback_nav(&self, ship_id: &str, world: &World) -> Option<Value> {
        let ship = world.get_ship(ship_id)?;
        let objective: &ShipObjective = self.intent.objectives.get(ship_id)?;
        let [dx, dy] = objective.destination;
        let heading = bearing_to_deg(ship.kin.x, ship.kin.y, dx, dy);
        let speed = match objective.speed_kn {
            Some(speed) => speed.clamp(0.0, ship.hull.max_speed),
            None => {
                if self.ship_alerted(ship_id) {
                    ship.hull.max_speed
                } else {
                    ship.hull.max_speed.min(18.0)
                }
            }
        };
        let depth = match ship.ship_class {
            ShipClass::Convoy | ShipClass::Destroyer => 0.0,
            ShipClass::Ssn => ship.kin.depth,
        };
        Some(json!({
            "tool": "set_nav",
            "arguments": {"heading": heading, "speed": speed, "depth": depth},
        }))
    }

    /// Normalize a raw intent document into a complete `FleetIntent`:
    /// every RED ship gains a destination, speed, and goal; EMCON and
    /// notes are always present.
    pub fn normalize_intent(&self, raw: &Value, world: &World) -> FleetIntent {
        let mut intent = FleetIntent {
            summary: raw
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            ..FleetIntent::default()
        };

        let raw_objectives = raw.get("objectives").and_then(Value::as_object);
        let target_wp = self.mission.target_wp;
        let mission_speed_limit = self
            .mission
            .speed_limits
            .values()
            .find_map(|v| v.get("max_kn").and_then(Value::as_f64));
        for ship in world.ships_on_side(Side::Red) {
            let raw_obj = raw_objectives.and_then(|m| m.get(&ship.id));
            let destination = raw_obj
                .and_then(|o| o.get("destination"))
                .and_then(Value::as_array)
                .filter(|a| a.len() == 2)
                .and_then(|a| Some([a[0].as_f64()?, a[1].as_f64()?]))
                .or(target_wp)
                .unwrap_or([ship.kin.x, ship.kin.y]);
            let speed_kn = raw_obj
                .and_then(|o| o.get("speed_kn"))
                .and_then(Value::as_f64)
                .or(mission_speed_limit)
                .unwrap_or_else(|| (0.6 * ship.hull.max_speed).min(ship.hull.max_speed).max(4.0));
            let goal = raw_obj
                .and_then(|o| o.get("goal"))
                .and_then(Value::as_str)
                .filter(|g| !g.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!(
                        "Proceed to [{:.0},{:.0}] at {:.0} kn",
                        destination[0], destination[1], speed_kn
                    )
                });
            intent.objectives.insert(
                ship.id.clone(),
                ShipObjective {
                    destination,
                    speed_kn: Some(speed_kn),
                    goal,
                },
            );
        }

        let mission_emcon = self.mission.emcon.get("RED");
        intent.emcon = EmconPolicy {
            active_ping_allowed: raw
                .pointer("/emcon/active_ping_allowed")
                .and_then(Value::as_bool)
                .or_else(|| {
                    mission_emcon
                        .and_then(|e| e.get("active_ping_allowed"))
                        .and_then(Value::as_bool)
                })
                .unwrap_or(false),
            radio_discipline: raw
                .pointer("/emcon/radio_discipline")
                .and_then(Value::as_str)
                .or_else(|| {
                    mission_emcon
                        .and_then(|e| e.get("radio_discipline"))
                        .and_then(Value::as_str)
                })
                .unwrap_or("restricted")
                .to_string(),
        };

        if let Some(notes) = raw.get("notes").and_then(Value::as_array) {
            for note in notes {
                let Some(text) = note.get("text").and_then(Value::as_str) else {
                    continue;
                };
                intent.notes.push(IntentNote {
                    ship_id: note
                        .get("ship_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    text: text.to_string(),
                });
            }
        }
        if intent.notes.is_empty() {
            intent.notes.push(IntentNote {
                ship_id: None,
                text: "Adhere EMCON and maintain formation; speeds may be adjusted tactically."
                    .to_string(),
            });
        }
        if intent.summary.is_empty() {
            intent.summary = intent.summarize();
        }
        intent
    }

    fn push_run(&mut self, record: RunRecord) {
        self.append_run_log(&record);
        self.recent_runs.push_back(record);
        while self.recent_runs.len() > 50 {
            self.recent_runs.pop_front();
        }
    }

    fn append_run_log(&self, record: &RunRecord) {
        let Some(path) = &self.run_log_path else {
            return;
        };
        let Ok(line) = serde_json::to_string(record) else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = result {
            warn!("AI run log write failed: {}", e);
        }
    }

    /// Connectivity probe for both configured engines
    pub async fn health_check(&self) -> Value {
        let fleet = self.fleet_engine.health().await;
        let ship = self.ship_engine.health().await;
        json!({
            "fleet": {"ok": fleet.ok, "detail": fleet.detail},
            "ship": {"ok": ship.ok, "detail": ship.detail},
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{builtin_catalog, default_world, spawn_ship};
    use crate::models::Kinematics;
    use crate::storage::NullEventStore;
    use rand::SeedableRng;

    fn orchestrator() -> Orchestrator {
        let config = SimConfig {
            use_ai_orchestrator: true,
            ..SimConfig::default()
        };
        Orchestrator::new(&config)
    }

    fn seeded_world() -> World {
        let mut world = World::new();
        default_world(&mut world, &builtin_catalog());
        world
    }

    #[test]
    fn test_normalize_intent_fills_missing_objectives() {
        let mut orch = orchestrator();
        orch.inject_mission_brief(crate::assets::MissionBrief {
            target_wp: Some([5000.0, -2000.0]),
            ..Default::default()
        });
        let world = seeded_world();
        let intent = orch.normalize_intent(&json!({}), &world);
        let obj = intent.objectives.get("red-01").unwrap();
        assert_eq!(obj.destination, [5000.0, -2000.0]);
        assert!(obj.speed_kn.is_some());
        assert!(!obj.goal.is_empty());
        assert!(!intent.notes.is_empty());
        assert_eq!(intent.emcon.radio_discipline, "restricted");
        assert!(!intent.summary.is_empty());
    }

    #[test]
    fn test_normalize_intent_keeps_valid_fields() {
        let orch = orchestrator();
        let world = seeded_world();
        let raw = json!({
            "objectives": {"red-01": {"destination": [1.0, 2.0], "speed_kn": 9.0, "goal": "shadow"}},
            "emcon": {"active_ping_allowed": true, "radio_discipline": "open"},
            "summary": "press the attack",
            "notes": [{"ship_id": "red-01", "text": "watch the layer"}],
            "engagement_rules": {"weapons_free": true},
        });
        let intent = orch.normalize_intent(&raw, &world);
        let obj = intent.objectives.get("red-01").unwrap();
        assert_eq!(obj.destination, [1.0, 2.0]);
        assert_eq!(obj.speed_kn, Some(9.0));
        assert_eq!(obj.goal, "shadow");
        assert!(intent.emcon.active_ping_allowed);
        assert_eq!(intent.summary, "press the attack");
        // Legacy engagement_rules dropped by the typed model
        assert!(serde_json::to_value(&intent).unwrap().get("engagement_rules").is_none());
    }

    #[test]
    fn test_apply_set_nav_respects_capability_and_clamps() {
        let mut orch = orchestrator();
        let mut world = seeded_world();
        let mut events = EventQueue::new();
        let mut contacts = Vec::new();
        let mut rng = StdRng::seed_from_u64(1);

        let args = json!({"heading": 450.0, "speed": 99.0, "depth": 5000.0});
        orch.apply_tool(&mut world, "red-01", "set_nav", &args, &mut contacts, &mut events, 0.0, &mut rng)
            .unwrap();
        let order = orch.nav_orders.get("red-01").unwrap();
        assert_eq!(order.heading, 90.0);
        let red = world.get_ship("red-01").unwrap();
        assert_eq!(order.speed, red.hull.max_speed);
        assert_eq!(order.depth, red.hull.max_depth);

        // A ship that cannot set nav is rejected
        let catalog = builtin_catalog();
        let mut fixed = spawn_ship(&catalog["Convoy"], "cv-01", Side::Red, Kinematics::default());
        fixed.capabilities.can_set_nav = false;
        world.add_ship(fixed);
        let err = orch
            .apply_tool(&mut world, "cv-01", "set_nav", &args, &mut contacts, &mut events, 0.0, &mut rng)
            .unwrap_err();
        assert_eq!(err, "Tool not supported");
    }

    #[test]
    fn test_apply_fire_torpedo_capability_gate() {
        let mut orch = orchestrator();
        let mut world = seeded_world();
        let catalog = builtin_catalog();
        world.add_ship(spawn_ship(
            &catalog["Destroyer"],
            "dd-01",
            Side::Red,
            Kinematics::default(),
        ));
        let mut events = EventQueue::new();
        let mut contacts = Vec::new();
        let mut rng = StdRng::seed_from_u64(1);

        // Destroyers have no torpedoes
        let err = orch
            .apply_tool(
                &mut world,
                "dd-01",
                "fire_torpedo",
                &json!({"bearing": 90.0}),
                &mut contacts,
                &mut events,
                0.0,
                &mut rng,
            )
            .unwrap_err();
        assert_eq!(err, "Tool not supported");
        assert!(world.torpedoes.is_empty());

        // The RED submarine can quick-launch
        orch.apply_tool(
            &mut world,
            "red-01",
            "fire_torpedo",
            &json!({"bearing": 270.0, "run_depth": 80.0}),
            &mut contacts,
            &mut events,
            0.0,
            &mut rng,
        )
        .unwrap();
        assert_eq!(world.torpedoes.len(), 1);
        assert_eq!(world.torpedoes[0].enable_range_m, 800.0);
    }

    #[test]
    fn test_apply_active_ping_cooldown_and_counter_detection() {
        let mut orch = orchestrator();
        let mut world = seeded_world();
        let mut events = EventQueue::new();
        let mut contacts = Vec::new();
        let mut rng = StdRng::seed_from_u64(1);

        orch.apply_tool(&mut world, "red-01", "active_ping", &json!({}), &mut contacts, &mut events, 0.0, &mut rng)
            .unwrap();
        // Ownship is within 15 km of red-01, so it counter-detects
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].observer_id, "ownship");
        assert_eq!(contacts[0].kind, "ENEMY_ACTIVE_SONAR");
        assert!(events.iter().any(|e| e.kind() == "counterDetected"));

        let err = orch
            .apply_tool(&mut world, "red-01", "active_ping", &json!({}), &mut contacts, &mut events, 0.0, &mut rng)
            .unwrap_err();
        assert_eq!(err, "Ping on cooldown");
    }

    #[test]
    fn test_intent_fallback_nav_targets_destination() {
        let mut orch = orchestrator();
        let world = seeded_world();
        orch.intent.objectives.insert(
            "red-01".to_string(),
            ShipObjective {
                destination: [3000.0, 1000.0], // due north of red-01 at (3000, 0)
                speed_kn: None,
                goal: "patrol".to_string(),
            },
        );
        let nav = orch.intent_fallback_nav("red-01", &world).unwrap();
        assert_eq!(nav["tool"], "set_nav");
        let heading = nav["arguments"]["heading"].as_f64().unwrap();
        assert!((heading - 0.0).abs() < 1e-6);
        // Not alerted: cruise speed capped at 18
        assert_eq!(nav["arguments"]["speed"], 18.0);
    }

    #[tokio::test]
    async fn test_stub_ship_engine_records_disabled_run() {
        let mut orch = orchestrator();
        let mut world = seeded_world();
        let visual = VisualDetection::new();
        let mut events = EventQueue::new();
        let mut contacts = Vec::new();
        let mut rng = StdRng::seed_from_u64(1);
        let store = NullEventStore;

        // Force the ship timer to fire immediately
        orch.ship_timers.insert("red-01".to_string(), 0.01);
        orch.step(
            &mut world,
            &visual,
            &mut contacts,
            &mut events,
            0.0,
            1.0,
            0.05,
            &mut rng,
            &store,
            "run",
        );
        let run = orch
            .recent_runs
            .iter()
            .find(|r| r.agent == "ship")
            .expect("ship run recorded");
        assert_eq!(run.source, "disabled_stub");
        assert!(!run.ok);
        assert!(run.tool_calls_validated.is_empty());
    }

    #[tokio::test]
    async fn test_fleet_cadence_tightens_on_alert() {
        let mut orch = orchestrator();
        // Trigger the sticky alert window manually
        orch.fleet_alert_until_s = 100.0;
        assert_eq!(orch.effective_fleet_cadence(50.0), orch.fleet_alert_cadence_s);
        assert_eq!(orch.effective_fleet_cadence(150.0), orch.fleet_cadence_s);
    }

    #[test]
    fn test_ship_summary_shape_and_boundary() {
        let mut orch = orchestrator();
        let world = seeded_world();
        let visual = VisualDetection::new();
        let mut rng = StdRng::seed_from_u64(1);
        let summary = orch
            .build_ship_summary("red-01", &world, &visual, 10.0, &mut rng)
            .unwrap();
        assert_eq!(summary["self"]["id"], "red-01");
        assert!(summary.get("fleet_intent").is_some());
        assert!(summary.get("detected_state").is_some());
        // Information boundary: contacts never carry ground-truth
        // positions, only bearings (and visual range estimates).
        if let Some(contacts) = summary["contacts"].as_array() {
            for contact in contacts {
                assert!(contact.get("pos").is_none());
                assert!(contact.get("x").is_none());
            }
        }
    }

    #[test]
    fn test_fleet_summary_shape() {
        let mut orch = orchestrator();
        let world = seeded_world();
        let visual = VisualDetection::new();
        let mut rng = StdRng::seed_from_u64(1);
        let summary = orch.build_fleet_summary(&world, &visual, 10.0, &mut rng);
        assert_eq!(summary["own_fleet"].as_array().unwrap().len(), 1);
        assert!(summary.get("enemy_belief").is_some());
        assert!(summary.get("fleet_intent_last").is_some());
        assert!(summary.get("contact_history").is_some());
        // Own fleet entries carry truth for RED only
        assert_eq!(summary["own_fleet"][0]["id"], "red-01");
    }
}

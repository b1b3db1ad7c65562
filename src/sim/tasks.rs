//! Maintenance task lifecycle
//!
//! Each station's board spawns tasks on a randomized timer, progresses
//! the started task with station power, and escalates expired tasks
//! through `task -> failing -> failed`. After every update the board
//! recomputes aggregated penalties from the worst active stage per
//! station, so completing one task never clears the effects of another
//! that is still failed.

use rand::Rng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{MaintenanceTask, Ship, Station, TaskStage, tasks::task_catalog};

/// Baseline turn authority restored when helm penalties clear
pub const TURN_RATE_BASELINE_DPS: f64 = 7.0;

/// Per-station maintenance boards and spawn timers
#[derive(Debug)]
pub struct TaskBoard {
    tasks: BTreeMap<Station, Vec<MaintenanceTask>>,
    spawn_timers: BTreeMap<Station, f64>,
    /// Debug toggle: suppress new spawns, keep existing tasks
    pub spawns_enabled: bool,
}

impl TaskBoard {
    pub fn new(first_task_delay_s: f64) -> Self {
        let mut tasks = BTreeMap::new();
        let mut spawn_timers = BTreeMap::new();
        for station in Station::ALL {
            tasks.insert(station, Vec::new());
            spawn_timers.insert(station, first_task_delay_s);
        }
        Self {
            tasks,
            spawn_timers,
            spawns_enabled: true,
        }
    }

    pub fn reset(&mut self, first_task_delay_s: f64) {
        for station in Station::ALL {
            self.tasks.insert(station, Vec::new());
            self.spawn_timers.insert(station, first_task_delay_s);
        }
    }

    pub fn tasks(&self, station: Station) -> &[MaintenanceTask] {
        self.tasks.get(&station).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every active task as `(station, stage)`, for the noise engine
    pub fn stage_pairs(&self) -> Vec<(Station, TaskStage)> {
        self.tasks
            .iter()
            .flat_map(|(station, tasks)| tasks.iter().map(|t| (*station, t.stage)))
            .collect()
    }

    /// Seed a task directly (tests, scripted scenarios)
    pub fn insert_task(&mut self, task: MaintenanceTask) {
        self.tasks.entry(task.station).or_default().push(task);
    }

    /// Keep only the tasks matching the predicate on one station's board
    pub fn retain_tasks(&mut self, station: Station, keep: impl Fn(&MaintenanceTask) -> bool) {
        if let Some(tasks) = self.tasks.get_mut(&station) {
            tasks.retain(|t| keep(t));
        }
    }

    /// Push all spawn timers out so no task appears on its own
    pub fn suspend_spawn_timers(&mut self) {
        for timer in self.spawn_timers.values_mut() {
            *timer = f64::INFINITY;
        }
    }

    fn spawn_task(&mut self, station: Station, now_s: f64, rng: &mut StdRng) {
        let catalog = task_catalog(station);
        let (system, key, title) = catalog[rng.random_range(0..catalog.len())];
        let deadline = rng.random_range(25.0..45.0);
        self.tasks.entry(station).or_default().push(MaintenanceTask {
            id: format!("{}-{}", station.name(), Uuid::new_v4().simple()),
            station,
            system: system.to_string(),
            key: key.to_string(),
            title: title.to_string(),
            stage: TaskStage::Task,
            progress: 0.0,
            started: false,
            base_deadline_s: deadline,
            time_remaining_s: deadline,
            created_at_s: now_s,
        });
    }

    /// Start work on a station's board.
    ///
    /// With a `task_id`, only that task runs and the rest pause. Without
    /// one, the worst-stage, shortest-remaining task is chosen. An empty
    /// board spawns a task immediately and starts it.
    pub fn start_task(
        &mut self,
        station: Station,
        task_id: Option<&str>,
        now_s: f64,
        rng: &mut StdRng,
    ) -> Result<(), String> {
        if self.tasks(station).is_empty() {
            self.spawn_task(station, now_s, rng);
        }
        let tasks = self.tasks.get_mut(&station).expect("all stations seeded");
        match task_id {
            Some(id) if !id.is_empty() => {
                if !tasks.iter().any(|t| t.id == id) {
                    return Err("Unknown task".to_string());
                }
                for task in tasks.iter_mut() {
                    task.started = task.id == id;
                }
            }
            _ => {
                tasks.sort_by(|a, b| {
                    b.stage
                        .cmp(&a.stage)
                        .then(a.time_remaining_s.total_cmp(&b.time_remaining_s))
                });
                for (i, task) in tasks.iter_mut().enumerate() {
                    task.started = i == 0;
                }
            }
        }
        Ok(())
    }

    /// One tick of the task lifecycle, then penalty re-aggregation
    pub fn step(
        &mut self,
        ship: &mut Ship,
        dt: f64,
        now_s: f64,
        maint_spawn_scale: f64,
        rng: &mut StdRng,
    ) {
        // Spawn timers run even while suppressed so boards stay staggered
        for station in Station::ALL {
            let timer = self.spawn_timers.get_mut(&station).expect("all stations seeded");
            *timer -= dt;
            if *timer <= 0.0 {
                if self.spawns_enabled {
                    self.spawn_task(station, now_s, rng);
                }
                let base = rng.random_range(60.0..120.0);
                self.spawn_timers
                    .insert(station, base / maint_spawn_scale.max(0.2));
            }
        }

        for station in Station::ALL {
            let power_frac = station_power_fraction(ship, station);
            let tasks = self.tasks.get_mut(&station).expect("all stations seeded");
            let mut kept = Vec::with_capacity(tasks.len());
            for mut task in tasks.drain(..) {
                if task.stage != TaskStage::Failed {
                    task.time_remaining_s = (task.time_remaining_s - dt).max(0.0);
                }
                if task.started {
                    task.progress = (task.progress + 0.2 * power_frac * dt).min(1.0);
                }
                if task.progress >= 1.0 {
                    ship.maintenance.adjust(&task.system, 0.1);
                    continue;
                }
                if task.time_remaining_s <= 0.0 {
                    match task.stage {
                        TaskStage::Task => {
                            task.stage = TaskStage::Failing;
                            task.base_deadline_s *= 1.25;
                            task.time_remaining_s = task.base_deadline_s;
                            ship.maintenance.adjust(&task.system, -0.05);
                        }
                        TaskStage::Failing => {
                            task.stage = TaskStage::Failed;
                            ship.maintenance.adjust(&task.system, -0.10);
                        }
                        TaskStage::Failed => {}
                    }
                }
                kept.push(task);
            }
            *tasks = kept;
        }

        self.recompute_penalties(ship);
    }

    /// Re-apply aggregated penalties from the worst active stage per
    /// station, resetting stations with no tasks to baseline.
    pub fn recompute_penalties(&self, ship: &mut Ship) {
        for station in Station::ALL {
            let worst = self
                .tasks(station)
                .iter()
                .map(|t| t.stage)
                .max()
                .unwrap_or(TaskStage::Task);
            apply_stage_penalties(ship, station, worst);
        }
    }

    /// Captain-dashboard status for one station
    pub fn station_status(&self, station: Station, ok_flag: bool) -> &'static str {
        if !ok_flag {
            return "Failed";
        }
        if self
            .tasks(station)
            .iter()
            .any(|t| t.stage == TaskStage::Failing)
        {
            "Degraded"
        } else {
            "OK"
        }
    }
}

fn station_power_fraction(ship: &Ship, station: Station) -> f64 {
    let frac = match station {
        Station::Helm => ship.power.helm,
        Station::Sonar => ship.power.sonar,
        Station::Weapons => ship.power.weapons,
        Station::Engineering => ship.power.engineering,
    };
    frac.clamp(0.0, 1.0)
}

/// Degradation effects for one station at one stage. These are absolute
/// assignments so re-aggregation is idempotent.
pub fn apply_stage_penalties(ship: &mut Ship, station: Station, stage: TaskStage) {
    match station {
        Station::Helm => {
            let factor = match stage {
                TaskStage::Task => 1.0,
                TaskStage::Failing => 0.7,
                TaskStage::Failed => 0.0,
            };
            ship.hull.turn_rate_max = TURN_RATE_BASELINE_DPS * factor;
            if stage == TaskStage::Failed {
                ship.systems.rudder_ok = false;
            }
            if stage >= TaskStage::Failing {
                ship.acoustics.thermocline_on = true;
            }
        }
        Station::Sonar => {
            let (bearing_extra, snr_pen, range_add, active_bearing) = match stage {
                TaskStage::Task => (0.0, 0.0, 0.0, 0.0),
                TaskStage::Failing => (3.0, 3.0, 50.0, 0.5),
                TaskStage::Failed => (12.0, 10.0, 250.0, 3.0),
            };
            ship.acoustics.bearing_noise_extra = bearing_extra;
            ship.acoustics.passive_snr_penalty_db = snr_pen;
            ship.acoustics.active_range_noise_add_m = range_add;
            ship.acoustics.active_bearing_noise_extra = active_bearing;
            if stage == TaskStage::Failed {
                ship.systems.sonar_ok = false;
            }
        }
        Station::Weapons => {
            ship.weapons.time_penalty_multiplier = match stage {
                TaskStage::Task => 1.0,
                TaskStage::Failing => 1.4,
                TaskStage::Failed => 2.5,
            };
            if stage == TaskStage::Failed {
                ship.systems.tubes_ok = false;
            }
        }
        Station::Engineering => {
            if stage == TaskStage::Failed {
                ship.systems.ballast_ok = false;
            }
        }
    }
}

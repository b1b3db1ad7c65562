//! Append-only persistence
//!
//! Runs, periodic ownship snapshots, and simulation events go through
//! the `EventStore` trait. Writes are best-effort: a storage failure is
//! logged and swallowed, never surfaced to the tick loop.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

/// One persisted simulation event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub run_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub ts: i64,
}

/// One persisted ownship snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub run_id: String,
    pub heading: f64,
    pub speed: f64,
    pub depth: f64,
    pub ts: i64,
}

/// Append-only sink for runs, events, and snapshots
pub trait EventStore: Send + Sync {
    /// Open a new run and return its id
    fn create_run(&self) -> String;
    fn append_event(&self, run_id: &str, kind: &str, payload: Value);
    fn append_snapshot(&self, run_id: &str, heading: f64, speed: f64, depth: f64);
}

fn unix_ts() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Store that discards everything (tests, ephemeral runs)
pub struct NullEventStore;

impl EventStore for NullEventStore {
    fn create_run(&self) -> String {
        Uuid::new_v4().to_string()
    }
    fn append_event(&self, _run_id: &str, _kind: &str, _payload: Value) {}
    fn append_snapshot(&self, _run_id: &str, _heading: f64, _speed: f64, _depth: f64) {}
}

/// In-memory store for inspecting persisted records in tests
#[derive(Default)]
pub struct MemoryEventStore {
    pub events: Mutex<Vec<StoredEvent>>,
    pub snapshots: Mutex<Vec<StoredSnapshot>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_kinds(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|evs| evs.iter().map(|e| e.kind.clone()).collect())
            .unwrap_or_default()
    }
}

impl EventStore for MemoryEventStore {
    fn create_run(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn append_event(&self, run_id: &str, kind: &str, payload: Value) {
        if let Ok(mut events) = self.events.lock() {
            events.push(StoredEvent {
                run_id: run_id.to_string(),
                kind: kind.to_string(),
                payload,
                ts: unix_ts(),
            });
        }
    }

    fn append_snapshot(&self, run_id: &str, heading: f64, speed: f64, depth: f64) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.push(StoredSnapshot {
                run_id: run_id.to_string(),
                heading,
                speed,
                depth,
                ts: unix_ts(),
            });
        }
    }
}

/// JSONL file store: one `events.jsonl` and one `snapshots.jsonl` per
/// data directory, one JSON document per line.
pub struct JsonlEventStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlEventStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    fn append_line(&self, file: &str, value: &impl Serialize) {
        let _guard = match self.write_lock.lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Event store directory unavailable: {}", e);
            return;
        }
        let path = self.dir.join(file);
        let line = match serde_json::to_string(value) {
            Ok(l) => l,
            Err(e) => {
                warn!("Event store serialization failed: {}", e);
                return;
            }
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = result {
            warn!("Event store write to {} failed: {}", path.display(), e);
        }
    }
}

impl EventStore for JsonlEventStore {
    fn create_run(&self) -> String {
        let run_id = Uuid::new_v4().to_string();
        self.append_line(
            "runs.jsonl",
            &serde_json::json!({"run_id": run_id, "started_ts": unix_ts()}),
        );
        run_id
    }

    fn append_event(&self, run_id: &str, kind: &str, payload: Value) {
        self.append_line(
            "events.jsonl",
            &StoredEvent {
                run_id: run_id.to_string(),
                kind: kind.to_string(),
                payload,
                ts: unix_ts(),
            },
        );
    }

    fn append_snapshot(&self, run_id: &str, heading: f64, speed: f64, depth: f64) {
        self.append_line(
            "snapshots.jsonl",
            &StoredSnapshot {
                run_id: run_id.to_string(),
                heading,
                speed,
                depth,
                ts: unix_ts(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_store_records_events() {
        let store = MemoryEventStore::new();
        let run_id = store.create_run();
        store.append_event(&run_id, "weapons.fire", json!({"tube": 1}));
        store.append_snapshot(&run_id, 270.0, 8.0, 100.0);

        assert_eq!(store.event_kinds(), vec!["weapons.fire"]);
        let snapshots = store.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].heading, 270.0);
    }

    #[test]
    fn test_jsonl_store_failure_is_swallowed() {
        // A directory that cannot be created: writes must not panic.
        let store = JsonlEventStore::new(PathBuf::from("/proc/nonexistent/triton"));
        let run_id = store.create_run();
        store.append_event(&run_id, "torpedo.armed", json!({}));
    }

    #[test]
    fn test_jsonl_store_appends_lines() {
        let dir = std::env::temp_dir().join(format!("triton-store-{}", Uuid::new_v4()));
        let store = JsonlEventStore::new(dir.clone());
        let run_id = store.create_run();
        store.append_event(&run_id, "a", json!({"n": 1}));
        store.append_event(&run_id, "b", json!({"n": 2}));

        let raw = fs::read_to_string(dir.join("events.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 2);
        let _ = fs::remove_dir_all(dir);
    }
}

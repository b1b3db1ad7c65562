//! Configuration module
//!
//! Handles loading and parsing of the simulation settings file from the
//! data directory. All options carry defaults so the simulation runs
//! without any file present; a settings file overrides individual keys.
//!
//! The settings surface is intentionally flat: one recognized key per
//! option, matching the command/telemetry contract of the engine.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Flat simulation settings.
///
/// Every field has a default; `SimConfig::load` fills missing keys from
/// those defaults so partial settings files are valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Bind host for the (external) transport layer
    pub host: String,
    /// Bind port for the (external) transport layer
    pub port: u16,
    /// Fixed tick rate in Hz
    pub tick_hz: u32,
    /// Seconds between persisted ownship snapshots
    pub snapshot_s: f64,
    /// Whether weapons release requires captain consent
    pub require_captain_consent: bool,
    /// Master switch for the two-tier AI orchestrator
    pub use_ai_orchestrator: bool,
    /// Fleet agent engine kind: "stub" | "ollama" | "openai"
    pub ai_fleet_engine: String,
    /// Ship agent engine kind: "stub" | "ollama" | "openai"
    pub ai_ship_engine: String,
    /// Fleet agent model name
    pub ai_fleet_model: String,
    /// Ship agent model name
    pub ai_ship_model: String,
    /// Fleet agent cadence in seconds
    pub ai_fleet_cadence_s: f64,
    /// Fleet agent cadence while a contact alert is active
    pub ai_fleet_alert_cadence_s: f64,
    /// Per-ship agent cadence in seconds
    pub ai_ship_cadence_s: f64,
    /// Per-ship agent cadence while that ship is alerted
    pub ai_ship_alert_cadence_s: f64,
    /// Contact confidence that flips the fleet agent to alert cadence
    pub ai_fleet_trigger_conf_threshold: f64,
    /// Timeout for a single LLM HTTP call
    pub ai_http_timeout_s: f64,
    /// Optional JSONL file receiving one line per AI run
    pub ai_run_log_path: Option<String>,
    /// Base URL of the local Ollama service
    pub ollama_host: String,
    /// API key for the hosted chat endpoint
    pub openai_api_key: Option<String>,
    /// Base URL of the hosted chat endpoint
    pub openai_base_url: String,
    /// Delay before the first maintenance task spawns per station
    pub first_task_delay_s: f64,
    /// Global divisor applied to maintenance respawn intervals
    pub maint_spawn_scale: f64,
    /// Freeze non-player ships (when the orchestrator is off)
    pub enemy_static: bool,
    /// RNG seed; 0 derives a seed from the wall clock
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            tick_hz: 20,
            snapshot_s: 2.0,
            require_captain_consent: true,
            use_ai_orchestrator: false,
            ai_fleet_engine: "stub".to_string(),
            ai_ship_engine: "stub".to_string(),
            ai_fleet_model: "stub".to_string(),
            ai_ship_model: "stub".to_string(),
            ai_fleet_cadence_s: 45.0,
            ai_fleet_alert_cadence_s: 20.0,
            ai_ship_cadence_s: 20.0,
            ai_ship_alert_cadence_s: 10.0,
            ai_fleet_trigger_conf_threshold: 0.7,
            ai_http_timeout_s: 15.0,
            ai_run_log_path: None,
            ollama_host: "http://localhost:11434".to_string(),
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            first_task_delay_s: 30.0,
            maint_spawn_scale: 1.0,
            enemy_static: true,
            seed: 0,
        }
    }
}

impl SimConfig {
    /// Load settings from `<data_dir>/settings.yaml`.
    ///
    /// A missing file is not an error; defaults are used and a note is
    /// logged. A malformed file is an error.
    pub fn load_from_directory(data_dir: &Path) -> Result<Self, String> {
        let path = data_dir.join("settings.yaml");
        Self::load_from_file(&path)
    }

    /// Load settings from a specific YAML file, falling back to defaults
    /// when the file does not exist.
    pub fn load_from_file(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            info!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        let config: SimConfig = serde_yaml::from_str(&raw)
            .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;
        info!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Seconds per tick derived from `tick_hz`.
    pub fn dt(&self) -> f64 {
        1.0 / self.tick_hz.max(1) as f64
    }
}

/// Tracks the source of the active settings so the debug station can ask
/// for a reload at runtime without restarting the process.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    pub config: SimConfig,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    pub fn new(config: SimConfig, path: Option<PathBuf>) -> Self {
        Self { config, path }
    }

    /// Re-read the settings file this handle was loaded from.
    ///
    /// Returns the reloaded settings on success. When no file backs the
    /// handle, the current settings are kept.
    pub fn reload(&mut self) -> Result<&SimConfig, String> {
        if let Some(path) = self.path.clone() {
            match SimConfig::load_from_file(&path) {
                Ok(fresh) => {
                    self.config = fresh;
                    info!("Settings reloaded from {}", path.display());
                }
                Err(e) => {
                    warn!("Settings reload failed: {}", e);
                    return Err(e);
                }
            }
        }
        Ok(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.tick_hz, 20);
        assert_eq!(config.ai_fleet_cadence_s, 45.0);
        assert_eq!(config.ai_ship_alert_cadence_s, 10.0);
        assert!(config.require_captain_consent);
        assert!((config.dt() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let parsed: SimConfig =
            serde_yaml::from_str("tick_hz: 10\nenemy_static: false\n").unwrap();
        assert_eq!(parsed.tick_hz, 10);
        assert!(!parsed.enemy_static);
        // Untouched keys keep defaults
        assert_eq!(parsed.ai_http_timeout_s, 15.0);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = SimConfig::load_from_file(Path::new("/nonexistent/settings.yaml")).unwrap();
        assert_eq!(config.tick_hz, SimConfig::default().tick_hz);
    }
}

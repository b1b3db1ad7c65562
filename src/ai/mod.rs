//! AI orchestration for the hostile flotilla
//!
//! A two-tier agent stack: a fleet-level planner produces a normalized
//! `FleetIntent`, and per-ship captains issue validated tool calls.
//! Engines are pluggable (stub, Ollama, OpenAI-compatible); every run is
//! bounded, validated, recorded, and applied only on the tick executor.

pub mod engines;
pub mod summary;
pub mod orchestrator;

pub use engines::{EngineFailure, EngineKind, EngineResponse, LlmEngine, extract_json};
pub use orchestrator::{Orchestrator, RunRecord};

//! Data models for the TRITON simulation
//!
//! Plain serializable structures shared across the simulation core,
//! telemetry framer, and AI orchestrator. Entities are owned by the
//! `World` registry; everything outside the registry refers to them by
//! string id.

pub mod ship;
pub mod ordnance;
pub mod tasks;
pub mod intent;
pub mod contacts;

pub use ship::{
    Acoustics, DamageState, Hull, Kinematics, MaintenanceState, PowerAllocations, Reactor, Ship,
    ShipCapabilities, ShipClass, Side, SystemsStatus, Tube, TubeState, TubeTransition,
    WeaponsSuite,
};
pub use ordnance::{DepthCharge, Torpedo, TorpedoDef};
pub use tasks::{MaintenanceTask, Station, TaskStage};
pub use intent::{EmconPolicy, FleetIntent, IntentNote, ShipObjective};
pub use contacts::{ContactEvent, PingResponse, SonarContact, SyntheticContact};

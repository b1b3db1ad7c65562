//! Maintenance task models
//!
//! Tasks spawn per bridge station, progress while a crew member works
//! them, and escalate through `task -> failing -> failed` when their
//! deadlines expire. Aggregated station penalties are derived from the
//! worst active stage, not from individual task events.

use serde::{Deserialize, Serialize};

/// Bridge stations that own maintenance tasks and power fractions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Station {
    Helm,
    Sonar,
    Weapons,
    Engineering,
}

impl Station {
    pub const ALL: [Station; 4] = [
        Station::Helm,
        Station::Sonar,
        Station::Weapons,
        Station::Engineering,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Station::Helm => "helm",
            Station::Sonar => "sonar",
            Station::Weapons => "weapons",
            Station::Engineering => "engineering",
        }
    }

    pub fn parse(name: &str) -> Option<Station> {
        match name.to_ascii_lowercase().as_str() {
            "helm" => Some(Station::Helm),
            "sonar" => Some(Station::Sonar),
            "weapons" => Some(Station::Weapons),
            "engineering" => Some(Station::Engineering),
            _ => None,
        }
    }
}

/// Escalation stage of a task. Strictly non-decreasing over a task's
/// lifetime; ordering is derived so "worst stage" comparisons work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStage {
    Task,
    Failing,
    Failed,
}

impl TaskStage {
    pub fn name(self) -> &'static str {
        match self {
            TaskStage::Task => "task",
            TaskStage::Failing => "failing",
            TaskStage::Failed => "failed",
        }
    }
}

/// A single maintenance task on a station's board
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceTask {
    pub id: String,
    pub station: Station,
    /// System whose maintenance level this task affects
    pub system: String,
    pub key: String,
    pub title: String,
    pub stage: TaskStage,
    /// Work completed, 0..1
    pub progress: f64,
    pub started: bool,
    pub base_deadline_s: f64,
    pub time_remaining_s: f64,
    pub created_at_s: f64,
}

/// Fixed task catalog per station: `(system, key, title)` entries that
/// spawned tasks are drawn from.
pub fn task_catalog(station: Station) -> &'static [(&'static str, &'static str, &'static str)] {
    match station {
        Station::Helm => &[
            ("rudder", "helm.rudder.lube", "Rudder Lubricate"),
            ("rudder", "helm.rudder.linkage", "Rudder Linkage Adjust"),
            ("ballast", "helm.depth.sensor", "Depth/Pressure Sensor Recal"),
            ("ballast", "helm.pressure.sensor", "Hull Pressure Transducer Test"),
            ("ballast", "helm.salinity.sensor", "Salinity Sensor Clean"),
            ("ballast", "helm.temp.sensor", "Thermocline Temp Probe Cal"),
            ("rudder", "helm.gyro.align", "Gyro Alignment Check"),
            ("rudder", "helm.gps.sync", "GPS Time/Almanac Sync"),
            ("rudder", "helm.heading.encoder", "Heading Encoder Verify"),
            ("rudder", "helm.hydraulics.filter", "Hydraulics Filter Replace"),
        ],
        Station::Sonar => &[
            ("sonar", "sonar.hydro.cal", "Hydrophone Calibration"),
            ("sonar", "sonar.hydro.servo", "Hydrophone Servo Grease"),
            ("sonar", "sonar.passive.dsp", "Passive DSP Self-Test"),
            ("sonar", "sonar.ping.tx", "Ping Transmit Chain Test"),
            ("sonar", "sonar.ping.rx", "Ping Response Chain Test"),
            ("sonar", "sonar.preamp", "Preamp Gain Trim"),
            ("sonar", "sonar.array.cable", "Array Cable Continuity"),
            ("sonar", "sonar.cooling.loop", "Cooling Loop Flush"),
            ("sonar", "sonar.beamformer", "Beamformer Rebalance"),
            ("sonar", "sonar.clock", "ADC Clock Discipline"),
        ],
        Station::Weapons => &[
            ("tubes", "weap.tube.seal", "Tube Seal Inspection"),
            ("tubes", "weap.tube.purge", "Tube Purge Cycle"),
            ("tubes", "weap.tube.door", "Door Actuator Lube"),
            ("tubes", "weap.tube.bore", "Bore Clean & Inspect"),
            ("tubes", "weap.fire.ctrl", "Fire Control Align"),
            ("tubes", "weap.wire.handler", "Wire Guide Service"),
            ("tubes", "weap.gyros.spinup", "Gyro Spinup Test"),
            ("tubes", "weap.seeker.bench", "Seeker Bench Check"),
            ("tubes", "weap.power.bus", "Weapons Bus Check"),
            ("tubes", "weap.cooling.pump", "Cooling Pump Service"),
        ],
        Station::Engineering => &[
            ("ballast", "eng.ballast.valve", "Ballast Valve Service"),
            ("ballast", "eng.pump.impeller", "Pump Impeller Inspect"),
            ("ballast", "eng.scrubber", "Air Scrubber Replace"),
            ("ballast", "eng.heat.xchg", "Heat Exchanger Clean"),
            ("ballast", "eng.reactor.coolant", "Coolant Chemistry Check"),
            ("ballast", "eng.generator", "Generator Bearing Lube"),
            ("ballast", "eng.battery.cell", "Battery Cell Test"),
            ("ballast", "eng.hvac.filter", "HVAC Filter Replace"),
            ("ballast", "eng.busbars", "Busbar Tightening"),
            ("ballast", "eng.pipe.leak", "Pipe Leak Inspection"),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordering() {
        assert!(TaskStage::Task < TaskStage::Failing);
        assert!(TaskStage::Failing < TaskStage::Failed);
    }

    #[test]
    fn test_station_parse_roundtrip() {
        for station in Station::ALL {
            assert_eq!(Station::parse(station.name()), Some(station));
        }
        assert_eq!(Station::parse("galley"), None);
    }

    #[test]
    fn test_catalog_has_ten_entries_per_station() {
        for station in Station::ALL {
            assert_eq!(task_catalog(station).len(), 10);
        }
    }
}

//! Headset Fleet Shared Types
//!
//! This crate provides the telemetry types, heartbeat events, status texts and
//! the connectivity state machine shared by the fleet console and its device
//! collaborators.

pub mod state_machine;

use serde::{Deserialize, Serialize};

pub use state_machine::{ConnectivityTracker, LinkState, Property};

/// Sentinel shown for any reading that is not currently known
pub const UNKNOWN_READING: &str = "Unknown";

/// Timing parameters for the system
pub mod timing {
    /// Heartbeat probe interval in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

    /// A probe that does not answer within this bound counts as a lost heartbeat
    pub const HEARTBEAT_PROBE_TIMEOUT_MS: u64 = 3000;

    /// Process watchdog polling interval in seconds
    pub const WATCHDOG_POLL_INTERVAL_SECS: u64 = 1;
}

/// Status texts published on a session's status line
pub mod status {
    /// Published when the heartbeat is lost, cleared again on reconnect
    pub const CONNECTION_LOST: &str = "Lost connection to device";
    pub const REBOOTING: &str = "Rebooting";
    pub const SHUTTING_DOWN: &str = "Shutting down";
    pub const RECORDING_STARTED: &str = "Mixed reality recording started";
    pub const RECORDING_STOPPED: &str = "Mixed reality recording stopped";

    /// `Failed to <action> <target> - <detail>`
    pub fn failure(action: &str, target: Option<&str>, detail: impl std::fmt::Display) -> String {
        match target {
            Some(target) if !target.is_empty() => {
                format!("Failed to {} {} - {}", action, target, detail)
            }
            _ => format!("Failed to {} - {}", action, detail),
        }
    }

    pub fn waiting_for_exit(name: &str) -> String {
        format!("Waiting for {} to exit", name)
    }

    pub fn exited(name: &str) -> String {
        format!("{} has exited", name)
    }

    pub fn execution_state_unknown(name: &str, detail: impl std::fmt::Display) -> String {
        format!("Cannot determine execution state of {} - {}", name, detail)
    }

    pub fn downloaded(file_name: &str) -> String {
        format!("Downloaded {}", file_name)
    }
}

/// Where the headset is drawing power from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerSource {
    Ac,
    Battery,
}

impl std::fmt::Display for PowerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerSource::Ac => write!(f, "AC"),
            PowerSource::Battery => write!(f, "Battery"),
        }
    }
}

/// Thermal mitigation stage reported by the headset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThermalStage {
    #[default]
    Normal,
    Warm,
    Critical,
}

/// Readings attached to a received heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub power_source: PowerSource,
    /// None when the device reports no battery
    #[serde(default)]
    pub battery_percent: Option<f32>,
    #[serde(default)]
    pub thermal_stage: ThermalStage,
    /// Interpupillary distance in millimetres
    pub ipd: f32,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            power_source: PowerSource::Battery,
            battery_percent: Some(100.0),
            thermal_stage: ThermalStage::Normal,
            ipd: 64.0,
        }
    }
}

/// Display form of the telemetry, replaced as a whole record
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReadout {
    pub power_source: Option<PowerSource>,
    pub battery: String,
    pub thermal_alert: bool,
    pub ipd: String,
}

impl TelemetryReadout {
    /// Readout with every field at its "unknown" sentinel
    pub fn unknown() -> Self {
        Self {
            power_source: None,
            battery: UNKNOWN_READING.to_string(),
            thermal_alert: false,
            ipd: UNKNOWN_READING.to_string(),
        }
    }

    pub fn from_snapshot(snapshot: &TelemetrySnapshot) -> Self {
        Self {
            power_source: Some(snapshot.power_source),
            battery: match snapshot.battery_percent {
                Some(percent) => format!("{:.2}%", percent),
                None => UNKNOWN_READING.to_string(),
            },
            thermal_alert: snapshot.thermal_stage != ThermalStage::Normal,
            ipd: snapshot.ipd.to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }
}

impl Default for TelemetryReadout {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Signals delivered by a heartbeat source for one device
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatEvent {
    /// The device answered, carrying fresh telemetry
    Received(TelemetrySnapshot),
    /// The device stopped answering
    Lost,
    /// Progress text from an ongoing package install
    AppInstallStatus(String),
}

/// Remote process identifier
pub type ProcessId = u32;

/// An installed application package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Human-readable application name
    pub name: String,
    pub package_full_name: String,
    /// Application id relative to the package
    pub app_id: String,
}

/// A process running on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub process_id: ProcessId,
    pub image_name: String,
}

/// A mixed reality capture stored on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrcFileInfo {
    pub file_name: String,
    pub size_bytes: u64,
}

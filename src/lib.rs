//! Operator console for a fleet of mixed reality headsets
//!
//! Each monitored headset gets a session that tracks connectivity,
//! selection, telemetry and status from a heartbeat source, and a command
//! dispatcher that forwards operator commands to the headset's device
//! portal while the headset is connected and selected.

pub mod command;
pub mod config;
pub mod gateway;
pub mod heartbeat;
pub mod notify;
pub mod session;

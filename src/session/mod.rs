//! Session management for monitored headsets
//!
//! This module handles:
//! - Per-device connectivity, selection, telemetry and status state
//! - Heartbeat subscription with detach on close
//! - The registry of sessions the console operates on

mod device;
mod manager;

pub use device::{DeviceSession, SessionHandle, SessionSnapshot};
pub use manager::SessionManager;

//! Device gateway abstraction
//!
//! This module handles:
//! - The async trait every device-management backend implements
//! - The heartbeat probe the monitor polls
//! - An in-memory simulated headset for development and tests

mod simulated;
mod traits;

pub use simulated::{GatewayCall, GatewayOp, SimulatedHeadset};
pub use traits::{DeviceGateway, HeartbeatProbe};

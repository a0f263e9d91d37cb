//! Heartbeat source for one headset
//!
//! This module handles:
//! - Periodic liveness probing with a bounded wait
//! - Edge-triggered loss detection
//! - Observer registration and symmetric detach

mod monitor;

pub use monitor::{HeartbeatMonitor, HeartbeatSubscription, ObserverId};

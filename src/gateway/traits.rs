//! Collaborator traits for the device-management API

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use headset_shared::{MrcFileInfo, PackageInfo, ProcessId, ProcessInfo, TelemetrySnapshot};
use std::path::Path;

/// Remote operations offered by one headset's device-management API
///
/// Every call may suspend and every call may fail.
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    async fn terminate_all_applications(&self) -> Result<()>;

    async fn installed_applications(&self) -> Result<Vec<PackageInfo>>;

    async fn install_application(&self, package_path: &Path) -> Result<()>;

    async fn uninstall_application(&self, package_full_name: &str) -> Result<()>;

    /// Launch an application, returning the id of the started process
    async fn launch_application(&self, app_id: &str, package_full_name: &str) -> Result<ProcessId>;

    async fn running_processes(&self) -> Result<Vec<ProcessInfo>>;

    async fn reboot(&self) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;

    async fn set_ipd(&self, ipd: f32) -> Result<()>;

    async fn start_mixed_reality_recording(&self) -> Result<()>;

    async fn stop_mixed_reality_recording(&self) -> Result<()>;

    async fn mixed_reality_files(&self) -> Result<Vec<MrcFileInfo>>;

    async fn mixed_reality_file(&self, file_name: &str) -> Result<Bytes>;

    async fn delete_mixed_reality_file(&self, file_name: &str) -> Result<()>;

    /// Release the underlying connection
    async fn close(&self) {}
}

/// Liveness probe used by the heartbeat monitor
#[async_trait]
pub trait HeartbeatProbe: Send + Sync {
    /// Read a telemetry snapshot; an error means the device did not answer
    async fn probe(&self) -> Result<TelemetrySnapshot>;
}

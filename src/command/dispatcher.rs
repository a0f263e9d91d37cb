//! Command dispatcher for sending commands to one headset

use super::files::{download_recordings, DownloadReport};
use super::watchdog::{ProcessWatchdog, WatchdogRegistry};
use super::CommandError;
use crate::config::ConsoleConfig;
use crate::gateway::DeviceGateway;
use crate::session::SessionHandle;
use headset_shared::{status, timing, PackageInfo, ProcessId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-session dispatch settings
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub watchdog_interval: Duration,
    pub download_root: PathBuf,
    pub delete_after_download: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            watchdog_interval: Duration::from_secs(timing::WATCHDOG_POLL_INTERVAL_SECS),
            download_root: PathBuf::from("./mrc-downloads"),
            delete_after_download: false,
        }
    }
}

impl From<&ConsoleConfig> for DispatchOptions {
    fn from(config: &ConsoleConfig) -> Self {
        Self {
            watchdog_interval: config.watchdog.poll_interval(),
            download_root: config.downloads.root.clone(),
            delete_after_download: config.downloads.delete_after_download,
        }
    }
}

/// Forwards operator commands to the gateway while the device is usable
///
/// Every command is a silent no-op unless the device is connected and
/// selected. Gateway failures end up on the status line, never with the
/// caller.
pub struct CommandDispatcher {
    session: SessionHandle,
    gateway: Arc<dyn DeviceGateway>,
    watchdogs: WatchdogRegistry,
    options: DispatchOptions,
}

impl CommandDispatcher {
    pub fn new(
        session: SessionHandle,
        gateway: Arc<dyn DeviceGateway>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            session,
            gateway,
            watchdogs: WatchdogRegistry::new(),
            options,
        }
    }

    pub fn watchdogs(&self) -> &WatchdogRegistry {
        &self.watchdogs
    }

    /// Abort every process watchdog started by this dispatcher
    pub fn stop_watchdogs(&self) {
        self.watchdogs.abort_all();
    }

    async fn gate(&self, command: &str) -> bool {
        let open = self.session.accepts_commands().await;
        if !open {
            debug!(
                "[DISPATCH {}] {} skipped: device not connected and selected",
                self.session.address(),
                command
            );
        }
        open
    }

    async fn report_failure(&self, action: &str, target: Option<&str>, error: &anyhow::Error) {
        warn!(
            "[DISPATCH {}] {} {} failed: {:#}",
            self.session.address(),
            action,
            target.unwrap_or_default(),
            error
        );
        self.session
            .set_status(status::failure(action, target, error))
            .await;
    }

    /// Find an installed package by its app name
    async fn resolve_package(&self, app_name: &str) -> anyhow::Result<PackageInfo> {
        let packages = self.gateway.installed_applications().await?;
        packages
            .into_iter()
            .find(|p| p.name == app_name)
            .ok_or_else(|| CommandError::AppNotFound(app_name.to_string()).into())
    }

    async fn try_uninstall(&self, app_name: &str) -> anyhow::Result<()> {
        let package = self.resolve_package(app_name).await?;
        self.gateway
            .uninstall_application(&package.package_full_name)
            .await
    }

    async fn try_launch(&self, app_name: &str) -> anyhow::Result<ProcessId> {
        let package = self.resolve_package(app_name).await?;
        self.gateway
            .launch_application(&package.app_id, &package.package_full_name)
            .await
    }

    /// Install an application package from a local path
    pub async fn install_app(&self, package_path: &Path) {
        if !self.gate("install").await {
            return;
        }
        let target = package_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| package_path.display().to_string());

        match self.gateway.install_application(package_path).await {
            Ok(()) => info!("[DISPATCH {}] Installed {}", self.session.address(), target),
            Err(e) => self.report_failure("install", Some(target.as_str()), &e).await,
        }
    }

    /// Uninstall an application by name
    ///
    /// `AppUninstalled` is published afterwards whatever the outcome.
    pub async fn uninstall_app(&self, app_name: &str) {
        if self.gate("uninstall").await {
            match self.try_uninstall(app_name).await {
                Ok(()) => info!("[DISPATCH {}] Uninstalled {}", self.session.address(), app_name),
                Err(e) => self.report_failure("uninstall", Some(app_name), &e).await,
            }
        }
        self.session.publish_app_uninstalled();
    }

    /// Launch an application by name and watch its process until it exits
    ///
    /// Returns None when nothing was launched.
    pub async fn launch_app(&self, app_name: &str) -> Option<ProcessId> {
        if !self.gate("launch").await {
            return None;
        }

        match self.try_launch(app_name).await {
            Ok(process_id) => {
                info!(
                    "[DISPATCH {}] Launched {} as process {}",
                    self.session.address(),
                    app_name,
                    process_id
                );
                self.watchdogs.spawn(ProcessWatchdog::new(
                    process_id,
                    app_name,
                    self.options.watchdog_interval,
                    self.gateway.clone(),
                    self.session.clone(),
                ));
                Some(process_id)
            }
            Err(e) => {
                self.report_failure("launch", Some(app_name), &e).await;
                None
            }
        }
    }

    /// Reboot the device; it is treated as disconnected straight away
    pub async fn reboot(&self) {
        if !self.gate("reboot").await {
            return;
        }
        match self.gateway.reboot().await {
            Ok(()) => {
                self.session.set_status(status::REBOOTING).await;
                self.session.force_disconnect().await;
            }
            Err(e) => self.report_failure("reboot", None, &e).await,
        }
    }

    /// Shut the device down; it is treated as disconnected straight away
    pub async fn shutdown(&self) {
        if !self.gate("shutdown").await {
            return;
        }
        match self.gateway.shutdown().await {
            Ok(()) => {
                self.session.set_status(status::SHUTTING_DOWN).await;
                self.session.force_disconnect().await;
            }
            Err(e) => self.report_failure("shut down", None, &e).await,
        }
    }

    /// Names of the installed applications, sorted
    ///
    /// Best effort: empty when gated or when the query fails, without status text.
    pub async fn list_installed_apps(&self) -> Vec<String> {
        if !self.gate("list apps").await {
            return Vec::new();
        }
        match self.gateway.installed_applications().await {
            Ok(packages) => {
                let mut names: Vec<String> = packages.into_iter().map(|p| p.name).collect();
                names.sort();
                names
            }
            Err(e) => {
                debug!(
                    "[DISPATCH {}] Listing apps failed: {:#}",
                    self.session.address(),
                    e
                );
                Vec::new()
            }
        }
    }

    pub async fn close_all_apps(&self) {
        if !self.gate("close all apps").await {
            return;
        }
        if let Err(e) = self.gateway.terminate_all_applications().await {
            self.report_failure("close", Some("all apps"), &e).await;
        }
    }

    /// Set the interpupillary distance in millimetres
    pub async fn set_ipd(&self, ipd: f32) {
        if !self.gate("set ipd").await {
            return;
        }
        if let Err(e) = self.gateway.set_ipd(ipd).await {
            self.report_failure("set", Some("IPD"), &e).await;
        }
    }

    pub async fn start_mixed_reality_recording(&self) {
        if !self.gate("start recording").await {
            return;
        }
        match self.gateway.start_mixed_reality_recording().await {
            Ok(()) => self.session.set_status(status::RECORDING_STARTED).await,
            Err(e) => {
                self.report_failure("start", Some("mixed reality recording"), &e)
                    .await
            }
        }
    }

    pub async fn stop_mixed_reality_recording(&self) {
        if !self.gate("stop recording").await {
            return;
        }
        match self.gateway.stop_mixed_reality_recording().await {
            Ok(()) => self.session.set_status(status::RECORDING_STOPPED).await,
            Err(e) => {
                self.report_failure("stop", Some("mixed reality recording"), &e)
                    .await
            }
        }
    }

    /// Download every mixed reality capture on the device
    pub async fn download_mixed_reality_files(&self) -> DownloadReport {
        if !self.gate("download").await {
            return DownloadReport::default();
        }
        download_recordings(
            self.gateway.as_ref(),
            &self.session,
            &self.options.download_root,
            self.options.delete_after_download,
        )
        .await
    }
}

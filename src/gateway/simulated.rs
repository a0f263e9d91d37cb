//! In-memory headset simulation
//!
//! Stands in for a real device-management endpoint during development and in
//! tests: installed packages, processes that exit after a number of polls,
//! recordings on disk, per-operation failure injection and a call log.

use super::traits::{DeviceGateway, HeartbeatProbe};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use headset_shared::{MrcFileInfo, PackageInfo, ProcessId, ProcessInfo, TelemetrySnapshot};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Gateway operations, used for failure injection and the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    TerminateAll,
    ListPackages,
    Install,
    Uninstall,
    Launch,
    ListProcesses,
    Reboot,
    Shutdown,
    SetIpd,
    StartRecording,
    StopRecording,
    ListFiles,
    FetchFile,
    DeleteFile,
    Close,
}

impl std::fmt::Display for GatewayOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GatewayOp::TerminateAll => "terminate-all",
            GatewayOp::ListPackages => "list-packages",
            GatewayOp::Install => "install",
            GatewayOp::Uninstall => "uninstall",
            GatewayOp::Launch => "launch",
            GatewayOp::ListProcesses => "list-processes",
            GatewayOp::Reboot => "reboot",
            GatewayOp::Shutdown => "shutdown",
            GatewayOp::SetIpd => "set-ipd",
            GatewayOp::StartRecording => "start-recording",
            GatewayOp::StopRecording => "stop-recording",
            GatewayOp::ListFiles => "list-files",
            GatewayOp::FetchFile => "fetch-file",
            GatewayOp::DeleteFile => "delete-file",
            GatewayOp::Close => "close",
        };
        write!(f, "{}", name)
    }
}

/// One recorded gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCall {
    pub op: GatewayOp,
    pub target: Option<String>,
}

struct RunningProcess {
    info: ProcessInfo,
    /// Polls left before the process exits; None runs forever
    remaining_polls: Option<u32>,
}

struct SimState {
    reachable: bool,
    /// Probes that still fail after a reboot
    down_for_probes: u32,
    telemetry: TelemetrySnapshot,
    packages: Vec<PackageInfo>,
    processes: HashMap<ProcessId, RunningProcess>,
    next_pid: ProcessId,
    process_lifetime: Option<u32>,
    recordings: BTreeMap<String, Bytes>,
    recording: bool,
    failing_ops: HashSet<GatewayOp>,
    failing_files: HashSet<String>,
    calls: Vec<GatewayCall>,
}

/// Simulated headset implementing both the gateway and the heartbeat probe
pub struct SimulatedHeadset {
    address: String,
    reboot_downtime_probes: u32,
    state: Mutex<SimState>,
}

impl SimulatedHeadset {
    /// Create a reachable headset with no packages, processes or recordings
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reboot_downtime_probes: 3,
            state: Mutex::new(SimState {
                reachable: true,
                down_for_probes: 0,
                telemetry: TelemetrySnapshot::default(),
                packages: Vec::new(),
                processes: HashMap::new(),
                next_pid: 4000,
                process_lifetime: Some(3),
                recordings: BTreeMap::new(),
                recording: false,
                failing_ops: HashSet::new(),
                failing_files: HashSet::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Add an installed package whose full name and app id derive from `name`
    pub fn with_package(self, name: &str) -> Self {
        self.lock().packages.push(package_for(name));
        self
    }

    /// Add a stored mixed reality recording
    pub fn with_recording(self, file_name: &str, contents: &[u8]) -> Self {
        self.lock()
            .recordings
            .insert(file_name.to_string(), Bytes::copy_from_slice(contents));
        self
    }

    /// Number of process polls a launched process survives; None never exits
    pub fn with_process_lifetime(self, polls: Option<u32>) -> Self {
        self.lock().process_lifetime = polls;
        self
    }

    pub fn with_telemetry(self, telemetry: TelemetrySnapshot) -> Self {
        self.lock().telemetry = telemetry;
        self
    }

    /// Make every call of `op` fail
    pub fn fail_on(&self, op: GatewayOp) {
        self.lock().failing_ops.insert(op);
    }

    /// Make fetching one recording fail
    pub fn fail_file(&self, file_name: &str) {
        self.lock().failing_files.insert(file_name.to_string());
    }

    pub fn set_reachable(&self, reachable: bool) {
        let mut state = self.lock();
        state.reachable = reachable;
        state.down_for_probes = 0;
    }

    pub fn set_telemetry(&self, telemetry: TelemetrySnapshot) {
        self.lock().telemetry = telemetry;
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    /// Recorded calls of one operation, with their targets
    pub fn calls_of(&self, op: GatewayOp) -> Vec<Option<String>> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.target.clone())
            .collect()
    }

    pub fn recording_names(&self) -> Vec<String> {
        self.lock().recordings.keys().cloned().collect()
    }

    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    /// Record the call and apply failure injection
    fn begin(&self, op: GatewayOp, target: Option<&str>) -> Result<MutexGuard<'_, SimState>> {
        let mut state = self.lock();
        state.calls.push(GatewayCall {
            op,
            target: target.map(str::to_string),
        });
        debug!("[SIM {}] {} {:?}", self.address, op, target);

        if !state.reachable {
            return Err(anyhow!("Device {} is unreachable", self.address));
        }
        if state.failing_ops.contains(&op) {
            return Err(anyhow!("Simulated {} failure", op));
        }
        Ok(state)
    }
}

fn package_for(name: &str) -> PackageInfo {
    PackageInfo {
        name: name.to_string(),
        package_full_name: format!("{}_1.0.0.0_x64__sim", name),
        app_id: format!("{}!App", name),
    }
}

#[async_trait]
impl DeviceGateway for SimulatedHeadset {
    async fn terminate_all_applications(&self) -> Result<()> {
        let mut state = self.begin(GatewayOp::TerminateAll, None)?;
        state.processes.clear();
        Ok(())
    }

    async fn installed_applications(&self) -> Result<Vec<PackageInfo>> {
        let state = self.begin(GatewayOp::ListPackages, None)?;
        Ok(state.packages.clone())
    }

    async fn install_application(&self, package_path: &Path) -> Result<()> {
        let target = package_path.display().to_string();
        let mut state = self.begin(GatewayOp::Install, Some(target.as_str()))?;
        let name = package_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("Invalid package path: {}", target))?;

        if !state.packages.iter().any(|p| p.name == name) {
            state.packages.push(package_for(name));
        }
        Ok(())
    }

    async fn uninstall_application(&self, package_full_name: &str) -> Result<()> {
        let mut state = self.begin(GatewayOp::Uninstall, Some(package_full_name))?;
        let before = state.packages.len();
        state.packages.retain(|p| p.package_full_name != package_full_name);
        if state.packages.len() == before {
            return Err(anyhow!("Package {} is not installed", package_full_name));
        }
        Ok(())
    }

    async fn launch_application(&self, app_id: &str, package_full_name: &str) -> Result<ProcessId> {
        let mut state = self.begin(GatewayOp::Launch, Some(app_id))?;
        let package = state
            .packages
            .iter()
            .find(|p| p.package_full_name == package_full_name && p.app_id == app_id)
            .cloned()
            .ok_or_else(|| anyhow!("Package {} is not installed", package_full_name))?;

        let pid = state.next_pid;
        state.next_pid += 4;
        let remaining_polls = state.process_lifetime;
        state.processes.insert(
            pid,
            RunningProcess {
                info: ProcessInfo {
                    process_id: pid,
                    image_name: format!("{}.exe", package.name),
                },
                remaining_polls,
            },
        );
        Ok(pid)
    }

    async fn running_processes(&self) -> Result<Vec<ProcessInfo>> {
        let mut state = self.begin(GatewayOp::ListProcesses, None)?;
        state.processes.retain(|_, p| p.remaining_polls != Some(0));

        let mut snapshot: Vec<ProcessInfo> =
            state.processes.values().map(|p| p.info.clone()).collect();
        snapshot.sort_by_key(|p| p.process_id);

        for process in state.processes.values_mut() {
            if let Some(ref mut remaining) = process.remaining_polls {
                *remaining -= 1;
            }
        }
        Ok(snapshot)
    }

    async fn reboot(&self) -> Result<()> {
        let mut state = self.begin(GatewayOp::Reboot, None)?;
        state.processes.clear();
        state.recording = false;
        state.down_for_probes = self.reboot_downtime_probes;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let mut state = self.begin(GatewayOp::Shutdown, None)?;
        state.processes.clear();
        state.recording = false;
        state.reachable = false;
        Ok(())
    }

    async fn set_ipd(&self, ipd: f32) -> Result<()> {
        let mut state = self.begin(GatewayOp::SetIpd, Some(ipd.to_string().as_str()))?;
        state.telemetry.ipd = ipd;
        Ok(())
    }

    async fn start_mixed_reality_recording(&self) -> Result<()> {
        let mut state = self.begin(GatewayOp::StartRecording, None)?;
        state.recording = true;
        Ok(())
    }

    async fn stop_mixed_reality_recording(&self) -> Result<()> {
        let mut state = self.begin(GatewayOp::StopRecording, None)?;
        if state.recording {
            state.recording = false;
            let name = format!("capture_{:03}.mp4", state.recordings.len() + 1);
            state.recordings.insert(name, Bytes::from_static(b"mp4"));
        }
        Ok(())
    }

    async fn mixed_reality_files(&self) -> Result<Vec<MrcFileInfo>> {
        let state = self.begin(GatewayOp::ListFiles, None)?;
        Ok(state
            .recordings
            .iter()
            .map(|(name, contents)| MrcFileInfo {
                file_name: name.clone(),
                size_bytes: contents.len() as u64,
            })
            .collect())
    }

    async fn mixed_reality_file(&self, file_name: &str) -> Result<Bytes> {
        let state = self.begin(GatewayOp::FetchFile, Some(file_name))?;
        if state.failing_files.contains(file_name) {
            return Err(anyhow!("Simulated transfer failure for {}", file_name));
        }
        state
            .recordings
            .get(file_name)
            .cloned()
            .ok_or_else(|| anyhow!("File {} not found", file_name))
    }

    async fn delete_mixed_reality_file(&self, file_name: &str) -> Result<()> {
        let mut state = self.begin(GatewayOp::DeleteFile, Some(file_name))?;
        state
            .recordings
            .remove(file_name)
            .map(|_| ())
            .ok_or_else(|| anyhow!("File {} not found", file_name))
    }

    async fn close(&self) {
        self.lock().calls.push(GatewayCall {
            op: GatewayOp::Close,
            target: None,
        });
    }
}

#[async_trait]
impl HeartbeatProbe for SimulatedHeadset {
    async fn probe(&self) -> Result<TelemetrySnapshot> {
        let mut state = self.lock();
        if !state.reachable {
            return Err(anyhow!("Device {} is unreachable", self.address));
        }
        if state.down_for_probes > 0 {
            state.down_for_probes -= 1;
            return Err(anyhow!("Device {} is restarting", self.address));
        }
        Ok(state.telemetry.clone())
    }
}

//! Process exit watchdog
//!
//! After a launch, polls the device's running-process list until the launched
//! process is gone, keeping the session's status line current.

use crate::gateway::DeviceGateway;
use crate::session::SessionHandle;
use headset_shared::{status, ProcessId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Duration, Instant};
use tracing::{debug, info, warn};

/// Shortest poll interval a watchdog will use
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How a watchdog finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The process is no longer running
    Exited,
    /// The process list could not be read; the watch was abandoned
    Indeterminate { reason: String },
}

/// Watches one launched process
pub struct ProcessWatchdog {
    process_id: ProcessId,
    name: String,
    poll_interval: Duration,
    gateway: Arc<dyn DeviceGateway>,
    session: SessionHandle,
}

impl ProcessWatchdog {
    /// A zero `poll_interval` is raised to `MIN_POLL_INTERVAL`.
    pub fn new(
        process_id: ProcessId,
        name: impl Into<String>,
        poll_interval: Duration,
        gateway: Arc<dyn DeviceGateway>,
        session: SessionHandle,
    ) -> Self {
        Self {
            process_id,
            name: name.into(),
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            gateway,
            session,
        }
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Poll until the process exits or the process list cannot be read
    ///
    /// Connectivity changes do not stop the watch.
    pub async fn run(self) -> WatchOutcome {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        let max_wait = self.poll_interval * 2;

        loop {
            let processes = match self.gateway.running_processes().await {
                Ok(processes) => processes,
                Err(e) => {
                    warn!(
                        "[WATCHDOG {}] Cannot read processes for {} ({}): {}",
                        self.session.address(),
                        self.name,
                        self.process_id,
                        e
                    );
                    self.session
                        .set_status(status::execution_state_unknown(&self.name, &e))
                        .await;
                    return WatchOutcome::Indeterminate {
                        reason: e.to_string(),
                    };
                }
            };

            if !processes.iter().any(|p| p.process_id == self.process_id) {
                info!(
                    "[WATCHDOG {}] {} ({}) exited",
                    self.session.address(),
                    self.name,
                    self.process_id
                );
                self.session.set_status(status::exited(&self.name)).await;
                return WatchOutcome::Exited;
            }

            self.session.set_status(status::waiting_for_exit(&self.name)).await;

            // Nothing but the timer can end this wait; the bound is a ceiling.
            if timeout(max_wait, ticker.tick()).await.is_err() {
                debug!("[WATCHDOG {}] Poll wait hit its ceiling", self.session.address());
            }
        }
    }
}

/// Running watchdogs of one session, keyed by process id
#[derive(Clone, Default)]
pub struct WatchdogRegistry {
    handles: Arc<Mutex<HashMap<ProcessId, JoinHandle<WatchOutcome>>>>,
}

impl WatchdogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProcessId, JoinHandle<WatchOutcome>>> {
        match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Spawn a watchdog unless one is already running for its process id
    ///
    /// Watchdogs for other process ids are left running.
    pub fn spawn(&self, watchdog: ProcessWatchdog) -> bool {
        let mut handles = self.lock();
        handles.retain(|_, handle| !handle.is_finished());

        let process_id = watchdog.process_id();
        if handles.contains_key(&process_id) {
            debug!("Watchdog for process {} already running", process_id);
            return false;
        }

        handles.insert(process_id, tokio::spawn(watchdog.run()));
        true
    }

    /// Number of watchdogs still running
    pub fn active_count(&self) -> usize {
        let mut handles = self.lock();
        handles.retain(|_, handle| !handle.is_finished());
        handles.len()
    }

    /// Abort every running watchdog
    pub fn abort_all(&self) {
        for (process_id, handle) in self.lock().drain() {
            if !handle.is_finished() {
                debug!("Aborting watchdog for process {}", process_id);
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayOp, SimulatedHeadset};
    use crate::notify::{ChannelSink, SessionEvent};
    use headset_shared::HeartbeatEvent;
    use tokio::sync::mpsc;

    async fn launched(
        lifetime: Option<u32>,
    ) -> (
        Arc<SimulatedHeadset>,
        SessionHandle,
        mpsc::UnboundedReceiver<SessionEvent>,
        ProcessId,
    ) {
        let headset = Arc::new(
            SimulatedHeadset::new("10.0.0.9")
                .with_package("Viewer")
                .with_process_lifetime(lifetime),
        );
        let pid = headset
            .launch_application("Viewer!App", "Viewer_1.0.0.0_x64__sim")
            .await
            .expect("launch");
        let (sink, rx) = ChannelSink::new();
        let session = SessionHandle::new("10.0.0.9", None, Arc::new(sink));
        (headset, session, rx, pid)
    }

    fn statuses(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::StatusChanged {
                message: Some(message),
                ..
            } = event
            {
                out.push(message);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_once_per_present_poll() {
        let (headset, session, mut rx, pid) = launched(Some(3)).await;
        let watchdog =
            ProcessWatchdog::new(pid, "Viewer", Duration::from_secs(1), headset.clone(), session);

        assert_eq!(watchdog.run().await, WatchOutcome::Exited);

        let messages = statuses(&mut rx);
        assert_eq!(
            messages,
            vec![
                "Waiting for Viewer to exit".to_string(),
                "Waiting for Viewer to exit".to_string(),
                "Waiting for Viewer to exit".to_string(),
                "Viewer has exited".to_string(),
            ]
        );
        assert_eq!(headset.calls_of(GatewayOp::ListProcesses).len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let (headset, session, mut rx, pid) = launched(Some(2)).await;
        let watchdog = ProcessWatchdog::new(pid, "Viewer", Duration::ZERO, headset.clone(), session);
        assert_eq!(watchdog.poll_interval, MIN_POLL_INTERVAL);

        assert_eq!(watchdog.run().await, WatchOutcome::Exited);
        assert_eq!(statuses(&mut rx).last().map(String::as_str), Some("Viewer has exited"));
        assert_eq!(headset.calls_of(GatewayOp::ListProcesses).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_error_is_terminal() {
        let (headset, session, mut rx, pid) = launched(None).await;
        headset.fail_on(GatewayOp::ListProcesses);
        let watchdog =
            ProcessWatchdog::new(pid, "Viewer", Duration::from_secs(1), headset.clone(), session);

        let outcome = watchdog.run().await;
        assert!(matches!(outcome, WatchOutcome::Indeterminate { .. }));
        assert_eq!(
            statuses(&mut rx),
            vec!["Cannot determine execution state of Viewer - Simulated list-processes failure"
                .to_string()]
        );
        assert_eq!(headset.calls_of(GatewayOp::ListProcesses).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_does_not_stop_watch() {
        let (headset, session, mut rx, pid) = launched(Some(2)).await;
        session.set_selected(true).await;
        session.apply_heartbeat(&HeartbeatEvent::Lost).await;
        let _ = statuses(&mut rx);

        let watchdog =
            ProcessWatchdog::new(pid, "Viewer", Duration::from_secs(1), headset, session.clone());
        assert_eq!(watchdog.run().await, WatchOutcome::Exited);
        assert_eq!(session.status().await.as_deref(), Some("Viewer has exited"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_keeps_independent_watches() {
        let (headset, session, _rx, pid) = launched(None).await;
        let second = headset
            .launch_application("Viewer!App", "Viewer_1.0.0.0_x64__sim")
            .await
            .expect("launch");
        let registry = WatchdogRegistry::new();
        let interval = Duration::from_secs(1);

        assert!(registry.spawn(ProcessWatchdog::new(
            pid,
            "Viewer",
            interval,
            headset.clone(),
            session.clone()
        )));
        assert!(!registry.spawn(ProcessWatchdog::new(
            pid,
            "Viewer",
            interval,
            headset.clone(),
            session.clone()
        )));
        assert!(registry.spawn(ProcessWatchdog::new(
            second,
            "Viewer",
            interval,
            headset.clone(),
            session
        )));
        assert_eq!(registry.active_count(), 2);

        registry.abort_all();
        assert_eq!(registry.active_count(), 0);
    }
}

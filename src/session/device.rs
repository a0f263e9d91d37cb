//! Individual headset session handling

use crate::command::{CommandDispatcher, DispatchOptions};
use crate::gateway::DeviceGateway;
use crate::heartbeat::{HeartbeatMonitor, ObserverId};
use crate::notify::{ConsoleSink, SessionEvent};
use headset_shared::{ConnectivityTracker, HeartbeatEvent, Property, TelemetryReadout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Mutable per-device state
#[derive(Debug, Default)]
struct SessionState {
    tag: Option<String>,
    tracker: ConnectivityTracker,
}

/// Point-in-time copy of a session's observable fields
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub address: String,
    pub tag: Option<String>,
    pub is_connected: bool,
    pub is_selected: bool,
    pub suspended_selection: bool,
    pub telemetry: TelemetryReadout,
    pub status: Option<String>,
}

/// Cloneable handle to a session's state and its console sink
///
/// The lock is only ever held for a field write or read, never across a
/// gateway call.
#[derive(Clone)]
pub struct SessionHandle {
    address: String,
    state: Arc<RwLock<SessionState>>,
    sink: Arc<dyn ConsoleSink>,
}

impl SessionHandle {
    pub fn new(address: impl Into<String>, tag: Option<String>, sink: Arc<dyn ConsoleSink>) -> Self {
        Self {
            address: address.into(),
            state: Arc::new(RwLock::new(SessionState {
                tag,
                tracker: ConnectivityTracker::new(),
            })),
            sink,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn tag(&self) -> Option<String> {
        self.state.read().await.tag.clone()
    }

    /// Tag if set, otherwise the address
    pub async fn display_name(&self) -> String {
        self.tag().await.unwrap_or_else(|| self.address.clone())
    }

    /// Rename the device
    pub async fn set_tag(&self, tag: Option<String>) {
        let tag = tag.filter(|t| !t.trim().is_empty());
        let mut state = self.state.write().await;
        if state.tag == tag {
            return;
        }
        state.tag = tag.clone();
        self.sink.publish(SessionEvent::PropertyChanged {
            address: self.address.clone(),
            property: Property::Tag,
        });
        self.sink.publish(SessionEvent::TagChanged {
            address: self.address.clone(),
            tag,
        });
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.tracker.is_connected()
    }

    pub async fn is_selected(&self) -> bool {
        self.state.read().await.tracker.is_selected()
    }

    /// True when commands may be forwarded to the gateway
    pub async fn accepts_commands(&self) -> bool {
        self.state.read().await.tracker.accepts_commands()
    }

    pub async fn telemetry(&self) -> TelemetryReadout {
        self.state.read().await.tracker.telemetry().clone()
    }

    pub async fn status(&self) -> Option<String> {
        self.state.read().await.tracker.status().map(str::to_string)
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().await;
        SessionSnapshot {
            address: self.address.clone(),
            tag: state.tag.clone(),
            is_connected: state.tracker.is_connected(),
            is_selected: state.tracker.is_selected(),
            suspended_selection: state.tracker.is_suspended(),
            telemetry: state.tracker.telemetry().clone(),
            status: state.tracker.status().map(str::to_string),
        }
    }

    /// Apply a heartbeat signal to the tracker
    pub async fn apply_heartbeat(&self, event: &HeartbeatEvent) {
        self.update(|tracker| tracker.process(event)).await;
    }

    /// Operator selection
    pub async fn set_selected(&self, selected: bool) {
        self.update(|tracker| tracker.set_selected(selected)).await;
    }

    /// Mark the device disconnected ahead of the heartbeat path
    pub async fn force_disconnect(&self) {
        self.update(|tracker| tracker.force_disconnect()).await;
    }

    /// Overwrite the status line
    pub async fn set_status(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|tracker| tracker.set_status(Some(message))).await;
    }

    pub async fn clear_status(&self) {
        self.update(|tracker| tracker.set_status(None)).await;
    }

    pub fn publish_app_uninstalled(&self) {
        self.sink.publish(SessionEvent::AppUninstalled {
            address: self.address.clone(),
        });
    }

    /// Mutate the tracker and publish one event per changed property
    ///
    /// Events are published before the write lock is released, so the
    /// console sees writes in the order they were applied.
    async fn update<F>(&self, apply: F)
    where
        F: FnOnce(&mut ConnectivityTracker) -> Vec<Property>,
    {
        let mut state = self.state.write().await;
        for property in apply(&mut state.tracker) {
            let event = match property {
                Property::Status => SessionEvent::StatusChanged {
                    address: self.address.clone(),
                    message: state.tracker.status().map(str::to_string),
                },
                property => SessionEvent::PropertyChanged {
                    address: self.address.clone(),
                    property,
                },
            };
            self.sink.publish(event);
        }
    }
}

/// A monitored headset: heartbeat subscription, state and command dispatcher
pub struct DeviceSession {
    handle: SessionHandle,
    commands: CommandDispatcher,
    gateway: Arc<dyn DeviceGateway>,
    heartbeat: Arc<HeartbeatMonitor>,
    observer: ObserverId,
    listener: JoinHandle<()>,
    closed: AtomicBool,
}

impl DeviceSession {
    /// Create a session and attach it to the device's heartbeat source
    pub fn open(
        address: impl Into<String>,
        tag: Option<String>,
        gateway: Arc<dyn DeviceGateway>,
        heartbeat: Arc<HeartbeatMonitor>,
        sink: Arc<dyn ConsoleSink>,
        options: DispatchOptions,
    ) -> Self {
        let handle = SessionHandle::new(address, tag, sink);
        let commands = CommandDispatcher::new(handle.clone(), gateway.clone(), options);

        let subscription = heartbeat.subscribe();
        let listener_handle = handle.clone();
        let listener = tokio::spawn(async move {
            handle_heartbeat_events(listener_handle, subscription.events).await;
        });

        info!("[SESSION {}] Opened", handle.address());

        Self {
            handle,
            commands,
            gateway,
            heartbeat,
            observer: subscription.id,
            listener,
            closed: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn commands(&self) -> &CommandDispatcher {
        &self.commands
    }

    pub fn address(&self) -> &str {
        self.handle.address()
    }

    /// Detach from the heartbeat source, stop watchdogs, release the gateway
    ///
    /// The heartbeat detach completes before the gateway is released.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.detach();
        self.commands.stop_watchdogs();
        self.gateway.close().await;
        info!("[SESSION {}] Closed", self.handle.address());
    }

    fn detach(&self) {
        self.heartbeat.unsubscribe(self.observer);
        self.listener.abort();
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            self.detach();
            self.commands.stop_watchdogs();
        }
    }
}

async fn handle_heartbeat_events(
    handle: SessionHandle,
    mut events: mpsc::UnboundedReceiver<HeartbeatEvent>,
) {
    while let Some(event) = events.recv().await {
        debug!("[SESSION {}] Heartbeat event: {:?}", handle.address(), event);
        handle.apply_heartbeat(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayOp, SimulatedHeadset};
    use crate::notify::ChannelSink;
    use headset_shared::{status, TelemetrySnapshot};
    use std::time::Duration;

    fn open_session(
        headset: Arc<SimulatedHeadset>,
        monitor: Arc<HeartbeatMonitor>,
    ) -> (DeviceSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sink, rx) = ChannelSink::new();
        let session = DeviceSession::open(
            "10.0.0.7",
            None,
            headset,
            monitor,
            Arc::new(sink),
            DispatchOptions::default(),
        );
        (session, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_events_drive_session() {
        let headset = Arc::new(SimulatedHeadset::new("10.0.0.7"));
        let monitor = Arc::new(HeartbeatMonitor::new("10.0.0.7"));
        let (session, _rx) = open_session(headset, monitor.clone());
        session.handle().set_selected(true).await;

        monitor.publish(HeartbeatEvent::Lost);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = session.handle().snapshot().await;
        assert!(!snapshot.is_connected);
        assert!(!snapshot.is_selected);
        assert!(snapshot.suspended_selection);
        assert_eq!(snapshot.status.as_deref(), Some(status::CONNECTION_LOST));

        monitor.publish(HeartbeatEvent::Received(TelemetrySnapshot::default()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = session.handle().snapshot().await;
        assert!(snapshot.is_connected);
        assert!(snapshot.is_selected);
        assert!(!snapshot.suspended_selection);
        assert_eq!(snapshot.status, None);
        assert_eq!(snapshot.telemetry.battery, "100.00%");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_detaches_before_release() {
        let headset = Arc::new(SimulatedHeadset::new("10.0.0.7"));
        let monitor = Arc::new(HeartbeatMonitor::new("10.0.0.7"));
        let (session, _rx) = open_session(headset.clone(), monitor.clone());
        assert_eq!(monitor.observer_count(), 1);

        session.close().await;
        assert_eq!(monitor.observer_count(), 0);
        assert_eq!(headset.calls_of(GatewayOp::Close).len(), 1);

        // Late events no longer reach the session.
        monitor.publish(HeartbeatEvent::Lost);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(session.handle().is_connected().await);

        session.close().await;
        assert_eq!(headset.calls_of(GatewayOp::Close).len(), 1);
    }

    #[tokio::test]
    async fn test_drop_detaches() {
        let headset = Arc::new(SimulatedHeadset::new("10.0.0.7"));
        let monitor = Arc::new(HeartbeatMonitor::new("10.0.0.7"));
        let (session, _rx) = open_session(headset, monitor.clone());

        drop(session);
        assert_eq!(monitor.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_tag_change_notifies_console() {
        let headset = Arc::new(SimulatedHeadset::new("10.0.0.7"));
        let monitor = Arc::new(HeartbeatMonitor::new("10.0.0.7"));
        let (session, mut rx) = open_session(headset, monitor);

        assert_eq!(session.handle().display_name().await, "10.0.0.7");
        session.handle().set_tag(Some("bay-3".into())).await;
        assert_eq!(session.handle().display_name().await, "bay-3");

        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::PropertyChanged {
                address: "10.0.0.7".into(),
                property: Property::Tag,
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::TagChanged {
                address: "10.0.0.7".into(),
                tag: Some("bay-3".into()),
            })
        );

        // Same tag again is not a change.
        session.handle().set_tag(Some("bay-3".into())).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_status_writes_publish_in_write_order() {
        let headset = Arc::new(SimulatedHeadset::new("10.0.0.7"));
        let monitor = Arc::new(HeartbeatMonitor::new("10.0.0.7"));
        let (session, mut rx) = open_session(headset, monitor);

        let writers: Vec<_> = ["Waiting for Viewer to exit", "Failed to reboot - x"]
            .into_iter()
            .map(|message| {
                let handle = session.handle().clone();
                tokio::spawn(async move {
                    for _ in 0..200 {
                        handle.set_status(message).await;
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.expect("writer");
        }

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::StatusChanged { message, .. } = event {
                last = message;
            }
        }
        assert!(last.is_some());
        assert_eq!(last, session.handle().status().await);
    }

    #[tokio::test]
    async fn test_status_writes_publish_each_time() {
        let headset = Arc::new(SimulatedHeadset::new("10.0.0.7"));
        let monitor = Arc::new(HeartbeatMonitor::new("10.0.0.7"));
        let (session, mut rx) = open_session(headset, monitor);

        session.handle().set_status("Waiting").await;
        session.handle().set_status("Waiting").await;

        for _ in 0..2 {
            assert_eq!(
                rx.recv().await,
                Some(SessionEvent::StatusChanged {
                    address: "10.0.0.7".into(),
                    message: Some("Waiting".into()),
                })
            );
        }
    }
}

//! Heartbeat monitor with observer registration

use crate::config::HeartbeatConfig;
use crate::gateway::HeartbeatProbe;
use headset_shared::HeartbeatEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Identifies one registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// A registered observer's end of the heartbeat stream
pub struct HeartbeatSubscription {
    pub id: ObserverId,
    pub events: mpsc::UnboundedReceiver<HeartbeatEvent>,
}

type ObserverMap = HashMap<ObserverId, mpsc::UnboundedSender<HeartbeatEvent>>;

#[derive(Clone, Default)]
struct Observers {
    inner: Arc<Mutex<ObserverMap>>,
}

impl Observers {
    fn lock(&self) -> MutexGuard<'_, ObserverMap> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn broadcast(&self, event: HeartbeatEvent) {
        // Observers whose receiver is gone are dropped on the way.
        self.lock().retain(|_, tx| tx.send(event.clone()).is_ok());
    }
}

/// Polls one device's heartbeat probe and fans the results out to observers
pub struct HeartbeatMonitor {
    address: String,
    observers: Observers,
    next_id: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    /// Create a monitor without starting the polling loop
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            observers: Observers::default(),
            next_id: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Create a monitor and start polling `probe`
    pub fn start(
        address: impl Into<String>,
        probe: Arc<dyn HeartbeatProbe>,
        config: HeartbeatConfig,
    ) -> Self {
        let monitor = Self::new(address);
        let observers = monitor.observers.clone();
        let address = monitor.address.clone();

        let handle = tokio::spawn(async move {
            poll_loop(address, probe, config, observers).await;
        });
        monitor.replace_task(Some(handle));
        monitor
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Register an observer
    pub fn subscribe(&self) -> HeartbeatSubscription {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().insert(id, tx);
        debug!("[HEARTBEAT {}] observer {:?} attached", self.address, id);
        HeartbeatSubscription { id, events: rx }
    }

    /// Detach an observer; no event is delivered to it afterwards
    pub fn unsubscribe(&self, id: ObserverId) {
        if self.observers.lock().remove(&id).is_some() {
            debug!("[HEARTBEAT {}] observer {:?} detached", self.address, id);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Deliver an event to every observer
    pub fn publish(&self, event: HeartbeatEvent) {
        self.observers.broadcast(event);
    }

    /// Forward install progress text from the device
    pub fn report_install_status(&self, message: impl Into<String>) {
        self.publish(HeartbeatEvent::AppInstallStatus(message.into()));
    }

    /// Stop the polling loop
    pub fn stop(&self) {
        if let Some(handle) = self.replace_task(None) {
            handle.abort();
            info!("[HEARTBEAT {}] Monitoring stopped", self.address);
        }
    }

    fn replace_task(&self, handle: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *task, handle)
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Probe on every tick; `Lost` is edge-triggered, `Received` is sent every time
async fn poll_loop(
    address: String,
    probe: Arc<dyn HeartbeatProbe>,
    config: HeartbeatConfig,
    observers: Observers,
) {
    let mut ticker = interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut alive = true;

    loop {
        ticker.tick().await;

        let result = match timeout(config.probe_timeout(), probe.probe()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "Probe timed out after {}ms",
                config.probe_timeout_ms
            )),
        };

        match result {
            Ok(snapshot) => {
                if !alive {
                    info!("[HEARTBEAT {}] Heartbeat restored", address);
                }
                alive = true;
                observers.broadcast(HeartbeatEvent::Received(snapshot));
            }
            Err(e) => {
                if alive {
                    warn!("[HEARTBEAT {}] Heartbeat lost: {}", address, e);
                    observers.broadcast(HeartbeatEvent::Lost);
                }
                alive = false;
            }
        }
    }
}

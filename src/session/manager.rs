//! Session manager for tracking all monitored headsets

use super::device::DeviceSession;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Registry of open sessions keyed by device address
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<DeviceSession>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a session, closing any previous session for the same address
    pub async fn register(&self, session: DeviceSession) -> Arc<DeviceSession> {
        let session = Arc::new(session);
        let previous = self
            .sessions
            .write()
            .await
            .insert(session.address().to_string(), session.clone());

        if let Some(previous) = previous {
            info!("Replacing session for {}", previous.address());
            previous.close().await;
        }
        session
    }

    /// Remove a device and close its session
    pub async fn remove(&self, address: &str) -> bool {
        let removed = self.sessions.write().await.remove(address);
        match removed {
            Some(session) => {
                session.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, address: &str) -> Option<Arc<DeviceSession>> {
        self.sessions.read().await.get(address).cloned()
    }

    /// Addresses of every registered device, sorted
    pub async fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub async fn sessions(&self) -> Vec<Arc<DeviceSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close and forget every session
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<DeviceSession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        join_all(sessions.iter().map(|s| s.close())).await;
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

//! Notifications from device sessions to the operator console

use headset_shared::Property;
use tokio::sync::mpsc;
use tracing::warn;

/// A change the console reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A session property changed; read the new value from the session
    PropertyChanged { address: String, property: Property },
    /// The status line was written
    StatusChanged {
        address: String,
        message: Option<String>,
    },
    /// The operator renamed the device
    TagChanged { address: String, tag: Option<String> },
    /// An uninstall finished, successfully or not; app lists need a refresh
    AppUninstalled { address: String },
}

impl SessionEvent {
    pub fn address(&self) -> &str {
        match self {
            SessionEvent::PropertyChanged { address, .. }
            | SessionEvent::StatusChanged { address, .. }
            | SessionEvent::TagChanged { address, .. }
            | SessionEvent::AppUninstalled { address } => address,
        }
    }
}

/// Implemented by the console to receive session events
///
/// May be called from any task, with the session's state lock held.
/// Implementations must not block; they forward onto whatever context they
/// need rather than assuming the caller's.
pub trait ConsoleSink: Send + Sync {
    fn publish(&self, event: SessionEvent);
}

/// Forwards events onto a channel drained by the console loop
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ConsoleSink for ChannelSink {
    fn publish(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            warn!("Console loop closed, dropping session event");
        }
    }
}

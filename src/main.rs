use fleet_console::config::{ConsoleConfig, DeviceEntry};
use fleet_console::gateway::SimulatedHeadset;
use fleet_console::heartbeat::HeartbeatMonitor;
use fleet_console::notify::{ChannelSink, SessionEvent};
use fleet_console::session::{DeviceSession, SessionManager};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ConsoleConfig::resolve(std::env::args_os().nth(1).map(PathBuf::from))?;

    let mut devices = config.devices.clone();
    if devices.is_empty() {
        devices.push(DeviceEntry {
            address: "127.0.0.1".into(),
            tag: Some("dev-headset".into()),
        });
    }

    info!("Fleet console starting with {} device(s)", devices.len());
    info!("  Heartbeat interval: {:?}", config.heartbeat.interval());
    info!("  Downloads: {}", config.downloads.root.display());

    let (sink, events) = ChannelSink::new();
    let sink = Arc::new(sink);

    tokio::spawn(async move {
        console_loop(events).await;
    });

    let manager = SessionManager::new();
    for device in devices {
        // Development mode: every device is backed by the in-memory headset
        let headset = Arc::new(SimulatedHeadset::new(device.address.clone()).with_package("Viewer"));
        let heartbeat = Arc::new(HeartbeatMonitor::start(
            device.address.clone(),
            headset.clone(),
            config.heartbeat.clone(),
        ));
        let session = DeviceSession::open(
            device.address,
            device.tag,
            headset,
            heartbeat,
            sink.clone(),
            (&config).into(),
        );
        let session = manager.register(session).await;
        session.handle().set_selected(true).await;
        info!("Monitoring {}", session.handle().display_name().await);
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, closing {} session(s)", manager.count().await);
    manager.close_all().await;

    Ok(())
}

/// Log every session notification
async fn console_loop(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::PropertyChanged { address, property } => {
                debug!("[{}] {:?} changed", address, property);
            }
            SessionEvent::StatusChanged { address, message } => match message {
                Some(message) => info!("[{}] {}", address, message),
                None => debug!("[{}] Status cleared", address),
            },
            SessionEvent::TagChanged { address, tag } => {
                info!("[{}] Tag is now {:?}", address, tag);
            }
            SessionEvent::AppUninstalled { address } => {
                info!("[{}] App uninstalled, refresh the app list", address);
            }
        }
    }
    warn!("Session event channel closed");
}

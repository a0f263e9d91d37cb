//! Connectivity State Machine
//!
//! Derives a device's connectivity, selection, telemetry readout and status
//! line from heartbeat signals and operator actions. Purely reactive: no I/O,
//! no timers.

use crate::{status, HeartbeatEvent, TelemetryReadout, TelemetrySnapshot};

/// Observable link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Session properties that raise change notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Address,
    Tag,
    Connected,
    Selected,
    Telemetry,
    Status,
}

/// Connectivity tracker for one device
#[derive(Debug, Clone)]
pub struct ConnectivityTracker {
    link: LinkState,
    /// True once a heartbeat-lost signal has been applied for the current outage
    lost_confirmed: bool,
    selected: bool,
    suspended_selection: bool,
    telemetry: TelemetryReadout,
    status: Option<String>,
}

impl Default for ConnectivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityTracker {
    /// Create a tracker in the optimistic Connected state, unselected
    pub fn new() -> Self {
        Self {
            link: LinkState::Connected,
            lost_confirmed: false,
            selected: false,
            suspended_selection: false,
            telemetry: TelemetryReadout::unknown(),
            status: None,
        }
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn is_connected(&self) -> bool {
        self.link == LinkState::Connected
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended_selection
    }

    /// Commands may only be forwarded while this holds
    pub fn accepts_commands(&self) -> bool {
        self.is_connected() && self.selected
    }

    pub fn telemetry(&self) -> &TelemetryReadout {
        &self.telemetry
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Apply a heartbeat signal and return the properties that changed
    pub fn process(&mut self, event: &HeartbeatEvent) -> Vec<Property> {
        match event {
            HeartbeatEvent::Lost => self.heartbeat_lost(),
            HeartbeatEvent::Received(snapshot) => self.heartbeat_received(snapshot),
            HeartbeatEvent::AppInstallStatus(message) => self.set_status(Some(message.clone())),
        }
    }

    fn heartbeat_lost(&mut self) -> Vec<Property> {
        if self.link == LinkState::Disconnected && self.lost_confirmed {
            return Vec::new();
        }

        let mut changed = Vec::new();
        self.lost_confirmed = true;

        if self.link != LinkState::Disconnected {
            self.link = LinkState::Disconnected;
            changed.push(Property::Connected);
        }

        changed.extend(self.set_status(Some(status::CONNECTION_LOST.to_string())));

        // A manual deselection is left alone; only a selected device is suspended.
        if self.selected && !self.suspended_selection {
            self.selected = false;
            self.suspended_selection = true;
            changed.push(Property::Selected);
        }

        changed.extend(self.set_telemetry(TelemetryReadout::unknown()));
        changed
    }

    fn heartbeat_received(&mut self, snapshot: &TelemetrySnapshot) -> Vec<Property> {
        let mut changed = Vec::new();
        self.lost_confirmed = false;

        if self.link != LinkState::Connected {
            self.link = LinkState::Connected;
            changed.push(Property::Connected);
        }

        if self.status.as_deref() == Some(status::CONNECTION_LOST) {
            changed.extend(self.set_status(None));
        }

        if self.suspended_selection {
            self.suspended_selection = false;
            if !self.selected {
                self.selected = true;
                changed.push(Property::Selected);
            }
        }

        changed.extend(self.set_telemetry(TelemetryReadout::from_snapshot(snapshot)));
        changed
    }

    /// Flip to Disconnected without waiting for the heartbeat path
    pub fn force_disconnect(&mut self) -> Vec<Property> {
        if self.link == LinkState::Disconnected {
            return Vec::new();
        }
        self.link = LinkState::Disconnected;
        self.lost_confirmed = false;
        vec![Property::Connected]
    }

    /// Operator selection; always clears an automatic suspension
    pub fn set_selected(&mut self, selected: bool) -> Vec<Property> {
        self.suspended_selection = false;
        if self.selected == selected {
            return Vec::new();
        }
        self.selected = selected;
        vec![Property::Selected]
    }

    /// Overwrite the status line
    ///
    /// Every write is reported, including a repeat of the current text.
    pub fn set_status(&mut self, message: Option<String>) -> Vec<Property> {
        self.status = message;
        vec![Property::Status]
    }

    fn set_telemetry(&mut self, readout: TelemetryReadout) -> Vec<Property> {
        if self.telemetry == readout {
            return Vec::new();
        }
        self.telemetry = readout;
        vec![Property::Telemetry]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PowerSource, ThermalStage, UNKNOWN_READING};

    fn snapshot() -> TelemetrySnapshot {
        TelemetrySnapshot {
            power_source: PowerSource::Battery,
            battery_percent: Some(55.5),
            thermal_stage: ThermalStage::Normal,
            ipd: 62.0,
        }
    }

    fn received() -> HeartbeatEvent {
        HeartbeatEvent::Received(snapshot())
    }

    #[test]
    fn test_initial_state() {
        let tracker = ConnectivityTracker::new();
        assert!(tracker.is_connected());
        assert!(!tracker.is_selected());
        assert!(!tracker.is_suspended());
        assert!(tracker.telemetry().is_unknown());
        assert_eq!(tracker.status(), None);
    }

    #[test]
    fn test_lost_suspends_and_received_restores() {
        let mut tracker = ConnectivityTracker::new();
        tracker.set_selected(true);
        tracker.process(&received());

        let changed = tracker.process(&HeartbeatEvent::Lost);
        assert!(changed.contains(&Property::Connected));
        assert!(changed.contains(&Property::Selected));
        assert!(changed.contains(&Property::Telemetry));
        assert!(!tracker.is_connected());
        assert!(!tracker.is_selected());
        assert!(tracker.is_suspended());
        assert_eq!(tracker.status(), Some(status::CONNECTION_LOST));
        assert_eq!(tracker.telemetry().battery, UNKNOWN_READING);

        tracker.process(&received());
        assert!(tracker.is_connected());
        assert!(tracker.is_selected());
        assert!(!tracker.is_suspended());
        assert_eq!(tracker.status(), None);
        assert_eq!(tracker.telemetry().battery, "55.50%");
        assert_eq!(tracker.telemetry().ipd, "62");
    }

    #[test]
    fn test_repeated_lost_is_noop() {
        let mut tracker = ConnectivityTracker::new();
        tracker.set_selected(true);
        tracker.process(&HeartbeatEvent::Lost);
        assert!(tracker.process(&HeartbeatEvent::Lost).is_empty());
        assert!(tracker.is_suspended());
    }

    #[test]
    fn test_manual_deselect_before_loss_is_not_restored() {
        let mut tracker = ConnectivityTracker::new();
        tracker.set_selected(true);
        tracker.set_selected(false);
        tracker.process(&HeartbeatEvent::Lost);
        assert!(!tracker.is_suspended());

        tracker.process(&received());
        assert!(!tracker.is_selected());
    }

    #[test]
    fn test_manual_deselect_during_outage_wins() {
        let mut tracker = ConnectivityTracker::new();
        tracker.set_selected(true);
        tracker.process(&HeartbeatEvent::Lost);
        assert!(tracker.is_suspended());

        tracker.set_selected(false);
        assert!(!tracker.is_suspended());

        tracker.process(&received());
        assert!(tracker.is_connected());
        assert!(!tracker.is_selected());
    }

    #[test]
    fn test_manual_select_during_outage_clears_suspension() {
        let mut tracker = ConnectivityTracker::new();
        tracker.set_selected(true);
        tracker.process(&HeartbeatEvent::Lost);

        let changed = tracker.set_selected(true);
        assert_eq!(changed, vec![Property::Selected]);
        assert!(!tracker.is_suspended());
        assert!(!tracker.accepts_commands());

        tracker.process(&received());
        assert!(tracker.accepts_commands());
    }

    #[test]
    fn test_reconnect_keeps_unrelated_status() {
        let mut tracker = ConnectivityTracker::new();
        tracker.process(&HeartbeatEvent::Lost);
        tracker.set_status(Some("Failed to launch Viewer - boom".into()));

        tracker.process(&received());
        assert_eq!(tracker.status(), Some("Failed to launch Viewer - boom"));
    }

    #[test]
    fn test_forced_disconnect_then_lost_completes_outage() {
        let mut tracker = ConnectivityTracker::new();
        tracker.set_selected(true);
        tracker.set_status(Some(status::REBOOTING.into()));

        assert_eq!(tracker.force_disconnect(), vec![Property::Connected]);
        assert!(tracker.force_disconnect().is_empty());
        assert!(tracker.is_selected());

        let changed = tracker.process(&HeartbeatEvent::Lost);
        assert!(!changed.contains(&Property::Connected));
        assert!(tracker.is_suspended());
        assert_eq!(tracker.status(), Some(status::CONNECTION_LOST));
    }

    #[test]
    fn test_connectivity_follows_latest_event() {
        let sequences: [&[bool]; 4] = [
            &[true, false, true],
            &[false, false, true, false],
            &[true, true],
            &[false, true, false, false, true, true, false],
        ];

        for sequence in sequences {
            let mut tracker = ConnectivityTracker::new();
            tracker.set_selected(true);
            for &alive in sequence {
                let event = if alive { received() } else { HeartbeatEvent::Lost };
                tracker.process(&event);
                assert_eq!(tracker.is_connected(), alive);
                assert_eq!(tracker.telemetry().is_unknown(), !alive);
                assert!(!tracker.is_suspended() || !tracker.is_connected());
            }
        }
    }

    #[test]
    fn test_thermal_alert_cleared_on_loss() {
        let mut tracker = ConnectivityTracker::new();
        tracker.process(&HeartbeatEvent::Received(TelemetrySnapshot {
            thermal_stage: ThermalStage::Critical,
            ..snapshot()
        }));
        assert!(tracker.telemetry().thermal_alert);

        tracker.process(&HeartbeatEvent::Lost);
        assert!(!tracker.telemetry().thermal_alert);
    }

    #[test]
    fn test_install_status_overwrites_status() {
        let mut tracker = ConnectivityTracker::new();
        let changed = tracker.process(&HeartbeatEvent::AppInstallStatus("Uploading".into()));
        assert_eq!(changed, vec![Property::Status]);
        assert_eq!(tracker.status(), Some("Uploading"));
    }
}

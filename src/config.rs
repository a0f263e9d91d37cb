//! Console configuration
//!
//! Every field has a default, so an empty or missing file yields a working
//! single-device console.

use headset_shared::timing;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the config file
pub const ENV_CONFIG_PATH: &str = "FLEET_CONSOLE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Heartbeat polling configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Probe interval
    pub interval_ms: u64,
    /// A probe slower than this counts as a lost heartbeat
    pub probe_timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: timing::HEARTBEAT_INTERVAL_MS,
            probe_timeout_ms: timing::HEARTBEAT_PROBE_TIMEOUT_MS,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Process watchdog configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub poll_interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: timing::WATCHDOG_POLL_INTERVAL_SECS,
        }
    }
}

impl WatchdogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Mixed reality download configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Parent of the per-device download folders
    pub root: PathBuf,
    /// Delete each remote file once its download succeeded
    pub delete_after_download: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./mrc-downloads"),
            delete_after_download: false,
        }
    }
}

/// A monitored headset
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceEntry {
    pub address: String,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Top-level console configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub heartbeat: HeartbeatConfig,
    pub watchdog: WatchdogConfig,
    pub downloads: DownloadConfig,
    pub devices: Vec<DeviceEntry>,
}

impl ConsoleConfig {
    /// Parse a TOML document
    pub fn from_toml(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(path, &contents)
    }

    /// Load from an explicit path, else from `FLEET_CONSOLE_CONFIG`, else defaults
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(|| std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from));
        match path {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat.interval_ms must be positive".into()));
        }
        if self.watchdog.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "watchdog.poll_interval_secs must be positive".into(),
            ));
        }
        if let Some(entry) = self.devices.iter().find(|d| d.address.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "device entry with tag {:?} has an empty address",
                entry.tag
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConsoleConfig::default();
        assert_eq!(config.heartbeat.interval_ms, timing::HEARTBEAT_INTERVAL_MS);
        assert_eq!(config.watchdog.poll_interval(), Duration::from_secs(1));
        assert!(!config.downloads.delete_after_download);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
            [heartbeat]
            interval_ms = 250

            [downloads]
            root = "/tmp/captures"
            delete_after_download = true

            [[devices]]
            address = "10.0.0.12"
            tag = "bay-3"

            [[devices]]
            address = "10.0.0.13"
        "#;

        let config = ConsoleConfig::from_toml(Path::new("console.toml"), toml).expect("parse");
        assert_eq!(config.heartbeat.interval_ms, 250);
        assert_eq!(config.heartbeat.probe_timeout_ms, timing::HEARTBEAT_PROBE_TIMEOUT_MS);
        assert_eq!(config.downloads.root, PathBuf::from("/tmp/captures"));
        assert!(config.downloads.delete_after_download);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].tag.as_deref(), Some("bay-3"));
        assert_eq!(config.devices[1].tag, None);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let result = ConsoleConfig::from_toml(
            Path::new("console.toml"),
            "[watchdog]\npoll_interval_secs = 0\n",
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ConsoleConfig::load(Path::new("/nonexistent/console.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}

//! Dock connection settings

use super::ConfigError;
use crate::core::codec::DEFAULT_MAX_LINE_LENGTH;
use crate::core::session::SessionConfig;
use crate::core::transport::SerialConnector;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Dock connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockSettings {
    /// Default serial port when none is given
    pub port: Option<String>,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Identity deadline in milliseconds
    pub identify_timeout_ms: u64,
    /// Reconnect backoff in milliseconds
    pub reconnect_delay_ms: u64,
    /// Grace period before an unused session closes, in milliseconds
    pub release_grace_ms: u64,
    /// Longest accepted line in bytes
    pub max_line_length: usize,
}

impl Default for DockSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            identify_timeout_ms: 4_000,
            reconnect_delay_ms: 5_000,
            release_grace_ms: 3_000,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl DockSettings {
    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&path)
    }

    /// Load settings from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save settings to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Session timing derived from these settings
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            identify_timeout: Duration::from_millis(self.identify_timeout_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            release_grace: Duration::from_millis(self.release_grace_ms),
            max_line_length: self.max_line_length,
        }
    }

    /// Serial connector using the configured baud rate
    pub fn serial_connector(&self) -> SerialConnector {
        SerialConnector::new(self.baud_rate)
    }
}

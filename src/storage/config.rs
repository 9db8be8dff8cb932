//! Application configuration.
//!
//! Loaded from `config.toml` in the platform data directory; a missing file
//! yields defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sensors::types::{DeviceKind, SensorConfig};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Sensor settings
    pub sensors: SensorSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            sensors: SensorSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Sensor-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// How long a device search scans before giving up, in seconds
    pub scan_timeout_secs: u64,
    /// Kinds connected at startup
    pub auto_connect: Vec<DeviceKind>,
    /// Send the FTMS request-control command after a trainer connects
    pub request_control_on_connect: bool,
    /// Preferred devices by name or id
    pub preferred: PreferredDevices,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 10,
            auto_connect: Vec::new(),
            request_control_on_connect: true,
            preferred: PreferredDevices::default(),
        }
    }
}

impl SensorSettings {
    /// Build the runtime sensor configuration.
    pub fn to_sensor_config(&self) -> SensorConfig {
        let preferred_devices = [
            (DeviceKind::Trainer, &self.preferred.trainer),
            (DeviceKind::PowerSensor, &self.preferred.power_sensor),
            (DeviceKind::HeartRateMonitor, &self.preferred.heart_rate_monitor),
        ]
        .into_iter()
        .filter_map(|(kind, filter)| filter.clone().map(|f| (kind, f)))
        .collect();

        SensorConfig {
            scan_timeout: Duration::from_secs(self.scan_timeout_secs),
            preferred_devices,
            request_control_on_connect: self.request_control_on_connect,
        }
    }
}

/// Name or id substring to prefer when several devices advertise a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferredDevices {
    pub trainer: Option<String>,
    pub power_sensor: Option<String>,
    pub heart_rate_monitor: Option<String>,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "ridelink", "RideLink")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load application configuration from `path`, or defaults if it is missing.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(&get_config_path(), config)
}

/// Save application configuration to `path`.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

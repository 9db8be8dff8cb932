//! Sensor types and enums for the BLE connection core.
//!
//! Device kinds, connection status, decoded readings, the event stream
//! payload and the error taxonomy shared by every sensor module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::sensors::ftms::{
    CYCLING_POWER_MEASUREMENT_UUID, CYCLING_POWER_SERVICE_UUID, FTMS_SERVICE_UUID,
    HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID, INDOOR_BIKE_DATA_UUID,
};

/// Kind of fitness sensor the core can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Smart trainer exposing the Fitness Machine Service
    Trainer,
    /// Standalone power meter (Cycling Power Service)
    PowerSensor,
    /// Heart rate monitor (Heart Rate Service)
    HeartRateMonitor,
}

impl DeviceKind {
    /// Every supported kind.
    pub const ALL: [DeviceKind; 3] = [
        DeviceKind::Trainer,
        DeviceKind::PowerSensor,
        DeviceKind::HeartRateMonitor,
    ];

    /// GATT service the device is selected and resolved by.
    pub fn service_uuid(self) -> Uuid {
        match self {
            DeviceKind::Trainer => FTMS_SERVICE_UUID,
            DeviceKind::PowerSensor => CYCLING_POWER_SERVICE_UUID,
            DeviceKind::HeartRateMonitor => HEART_RATE_SERVICE_UUID,
        }
    }

    /// Characteristic carrying the telemetry notifications.
    pub fn measurement_uuid(self) -> Uuid {
        match self {
            DeviceKind::Trainer => INDOOR_BIKE_DATA_UUID,
            DeviceKind::PowerSensor => CYCLING_POWER_MEASUREMENT_UUID,
            DeviceKind::HeartRateMonitor => HEART_RATE_MEASUREMENT_UUID,
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Trainer => write!(f, "Smart Trainer"),
            DeviceKind::PowerSensor => write!(f, "Power Meter"),
            DeviceKind::HeartRateMonitor => write!(f, "Heart Rate"),
        }
    }
}

/// Connection status of one device kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Nothing connected, no attempt in progress
    #[default]
    Idle,
    /// Waiting for a device to be selected
    Requesting,
    /// Device selected, GATT setup in progress
    Connecting,
    /// Notifications are flowing
    Connected,
    /// The last attempt failed; see the error map
    Error,
}

impl ConnectionStatus {
    /// Whether a session owns transport resources in this status.
    pub fn has_session(self) -> bool {
        matches!(self, ConnectionStatus::Connecting | ConnectionStatus::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Idle => write!(f, "Idle"),
            ConnectionStatus::Requesting => write!(f, "Requesting..."),
            ConnectionStatus::Connecting => write!(f, "Connecting..."),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Error => write!(f, "Error"),
        }
    }
}

/// Information about a device that reached `Connected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedDeviceInfo {
    /// Transport identifier of the device
    pub device_id: String,
    /// Human-readable name
    pub name: String,
    /// Always true while published
    pub connected: bool,
    /// When the connection was established
    pub connected_at: DateTime<Utc>,
}

/// Reading decoded from a Trainer or PowerSensor frame.
///
/// Every field is `None` when its flag bit was clear; absence means unknown,
/// not zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerReading {
    /// Speed in km/h
    pub speed_kph: Option<f32>,
    /// Cadence in RPM
    pub cadence_rpm: Option<f32>,
    /// Instantaneous power in watts (signed on the wire)
    pub power_watts: Option<i16>,
}

/// Reading decoded from a heart-rate frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateReading {
    /// Heart rate in BPM
    pub bpm: u16,
}

/// A decoded notification frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorReading {
    /// Trainer or power meter telemetry
    Trainer(TrainerReading),
    /// Heart rate telemetry
    HeartRate(HeartRateReading),
}

/// Host BLE availability as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdapterState {
    /// An adapter is present
    pub available: bool,
    /// The adapter is powered on
    pub enabled: bool,
}

/// Environment snapshot explaining whether connecting is possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    /// The host exposes BLE at all
    pub supports_transport: bool,
    /// An adapter is present
    pub available: bool,
    /// The adapter is powered on
    pub enabled: bool,
}

/// A device picked by the transport's selection step.
#[derive(Debug, Clone)]
pub struct SelectedDevice<D> {
    /// Transport-specific device handle
    pub handle: D,
    /// Stable identifier (address or platform UUID)
    pub device_id: String,
    /// Advertised name
    pub name: String,
}

/// Opaque token identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerToken(pub u64);

/// Events published by the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    /// New data decoded from a device
    Reading {
        kind: DeviceKind,
        reading: SensorReading,
    },
    /// Connection status of a kind changed
    StatusChanged {
        kind: DeviceKind,
        status: ConnectionStatus,
    },
    /// A connect attempt failed
    Error { kind: DeviceKind, message: String },
}

/// Runtime configuration for the connection core.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// How long device selection scans before giving up
    pub scan_timeout: Duration,
    /// Name or id substring preferred during selection, per kind
    pub preferred_devices: Vec<(DeviceKind, String)>,
    /// Send the FTMS request-control command after a trainer connects
    pub request_control_on_connect: bool,
}

impl SensorConfig {
    /// Preferred device filter for a kind, if any.
    pub fn preferred_device(&self, kind: DeviceKind) -> Option<&str> {
        self.preferred_devices
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, filter)| filter.as_str())
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(10),
            preferred_devices: Vec::new(),
            request_control_on_connect: true,
        }
    }
}

/// Errors that can occur in the sensor system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    /// The host has no BLE support
    #[error("Bluetooth is not supported on this host")]
    UnsupportedTransport,

    /// Device selection finished without a device
    #[error("No device was selected")]
    UserCancelled,

    /// GATT connection could not be established
    #[error("GATT connection failed: {0}")]
    GattConnectFailed(String),

    /// The device does not expose the expected service
    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    /// The service does not expose the expected characteristic
    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    /// Subscribing to notifications failed
    #[error("Failed to start notifications: {0}")]
    NotificationStartFailed(String),

    /// A frame was shorter than its flags require
    #[error("Malformed frame: needed {needed} bytes, got {actual}")]
    MalformedFrame { needed: usize, actual: usize },

    /// No connected session with a control characteristic
    #[error("Device not connected")]
    NotConnected,

    /// Writing a characteristic failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// The attempt was released before it completed
    #[error("Connection attempt superseded")]
    Superseded,

    /// Adapter-level failure
    #[error("BLE error: {0}")]
    Transport(String),
}

pub type Result<T, E = SensorError> = std::result::Result<T, E>;

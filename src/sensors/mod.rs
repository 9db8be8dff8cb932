//! Sensor module for BLE device connection and telemetry decoding.

pub mod btle;
pub mod control;
pub mod events;
pub mod ftms;
pub mod manager;
pub mod mock;
pub mod session;
pub mod transport;
pub mod types;

pub use btle::BtleTransport;
pub use control::ControlWriter;
pub use events::EventBus;
pub use ftms::{decode_frame, decode_heart_rate_frame, decode_trainer_frame};
pub use manager::ConnectionManager;
pub use mock::{MockGate, MockOperation, MockTransport};
pub use session::DeviceSession;
pub use transport::BleTransport;
pub use types::{
    AdapterState, ConnectedDeviceInfo, ConnectionStatus, DeviceKind, EnvironmentStatus,
    HeartRateReading, ListenerToken, SelectedDevice, SensorConfig, SensorError, SensorEvent,
    SensorReading, TrainerReading,
};

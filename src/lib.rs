//! RideLink - BLE connection core for indoor cycling sensors
//!
//! Connects to a smart trainer, a power meter and a heart rate monitor over
//! BLE GATT, decodes their telemetry notifications into typed readings and
//! exposes a per-device connection status, plus ERG control writes to the
//! trainer.

pub mod sensors;
pub mod storage;

// Re-export commonly used types
pub use sensors::manager::ConnectionManager;
pub use sensors::types::{ConnectionStatus, DeviceKind, SensorEvent, SensorReading};
pub use storage::config::AppConfig;

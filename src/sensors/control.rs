//! Outbound commands to the trainer's control point.
//!
//! Failures are logged and handed back to the caller. A dropped write never
//! tears the session down.

use crate::sensors::ftms::{
    build_request_control, build_set_target_power, build_set_target_resistance,
};
use crate::sensors::session::DeviceSession;
use crate::sensors::transport::BleTransport;
use crate::sensors::types::Result;

/// Encodes control commands and sends them through a session.
pub struct ControlWriter<'a, T: BleTransport> {
    session: &'a DeviceSession<T>,
}

impl<'a, T: BleTransport> ControlWriter<'a, T> {
    pub fn new(session: &'a DeviceSession<T>) -> Self {
        Self { session }
    }

    /// Ask the trainer to accept control commands.
    pub async fn request_control(&self) -> Result<()> {
        self.send("request control", &build_request_control()).await
    }

    /// Set the ERG target, clamped to 0-2000 W.
    pub async fn set_target_power(&self, watts: f64) -> Result<()> {
        self.send("target power", &build_set_target_power(watts)).await
    }

    /// Set the resistance level, clamped to 0-100.
    pub async fn set_resistance(&self, level: f64) -> Result<()> {
        self.send("resistance", &build_set_target_resistance(level)).await
    }

    async fn send(&self, label: &str, command: &[u8]) -> Result<()> {
        match self.session.write(command).await {
            Ok(()) => {
                tracing::debug!("Sent {} command {:02X?}", label, command);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to send {} command: {}", label, e);
                Err(e)
            }
        }
    }
}

//! Transport abstraction over the host's BLE stack.
//!
//! [`BleTransport`] wraps discovery, GATT connection, service resolution and
//! notification primitives so the session and manager can run against real
//! hardware ([`crate::sensors::btle::BtleTransport`]) or the in-process
//! [`crate::sensors::mock::MockTransport`].
//!
//! Notifications and disconnects are delivered through channels rather than
//! callbacks: the caller hands the transport a sender and consumes the
//! receiver on its own task. None of the operations retry internally.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::sensors::types::{AdapterState, ListenerToken, Result, SelectedDevice};

/// Sender half used by a transport to push raw notification frames.
pub type FrameSender = mpsc::UnboundedSender<Vec<u8>>;

/// Sender half used by a transport to report that a device dropped.
pub type DisconnectSender = mpsc::UnboundedSender<()>;

/// BLE discovery / connect / notify primitives.
#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    /// Selected device handle.
    type Device: Clone + Send + Sync + 'static;
    /// Connected GATT server handle.
    type Server: Clone + Send + Sync + 'static;
    /// Resolved primary service handle.
    type Service: Clone + Send + Sync + 'static;
    /// Resolved characteristic handle.
    type Characteristic: Clone + Send + Sync + 'static;

    /// Whether the host exposes BLE at all.
    async fn is_supported(&self) -> bool;

    /// Adapter presence and power state.
    async fn adapter_state(&self) -> Result<AdapterState>;

    /// Select a device advertising `service`.
    ///
    /// Fails with `UserCancelled` when no device is chosen.
    async fn request_device(&self, service: Uuid) -> Result<SelectedDevice<Self::Device>>;

    /// Open a GATT connection to the device.
    async fn connect_gatt(&self, device: &Self::Device) -> Result<Self::Server>;

    /// Close a GATT connection. Best-effort; failures are logged.
    async fn disconnect_gatt(&self, server: &Self::Server);

    /// Resolve a primary service; fails with `ServiceNotFound`.
    async fn get_service(&self, server: &Self::Server, service: Uuid) -> Result<Self::Service>;

    /// Resolve a characteristic; fails with `CharacteristicNotFound`.
    async fn get_characteristic(
        &self,
        service: &Self::Service,
        characteristic: Uuid,
    ) -> Result<Self::Characteristic>;

    /// Subscribe to notifications, forwarding every frame to `frames` in order.
    async fn start_notifications(
        &self,
        characteristic: &Self::Characteristic,
        frames: FrameSender,
    ) -> Result<ListenerToken>;

    /// Unsubscribe. Best-effort; failures are logged, never returned.
    async fn stop_notifications(&self, characteristic: &Self::Characteristic, token: ListenerToken);

    /// Register a listener fired when the device drops the connection.
    async fn on_disconnected(&self, device: &Self::Device, signal: DisconnectSender)
        -> ListenerToken;

    /// Remove a listener registered with [`BleTransport::on_disconnected`].
    async fn remove_disconnect_listener(&self, device: &Self::Device, token: ListenerToken);

    /// Write a value to a characteristic.
    async fn write_characteristic(
        &self,
        characteristic: &Self::Characteristic,
        bytes: &[u8],
    ) -> Result<()>;
}

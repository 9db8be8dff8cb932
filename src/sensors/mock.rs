//! In-process transport for tests and demos.
//!
//! [`MockTransport`] implements [`BleTransport`] against a table of fake
//! peripherals. It can inject failures into any step, pause a step until the
//! test lets it continue, push frames into active subscriptions, fire
//! device-side disconnects, and report how many listeners and GATT
//! connections are currently live so leaks show up as counts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::sensors::ftms::FTMS_CONTROL_POINT_UUID;
use crate::sensors::transport::{BleTransport, DisconnectSender, FrameSender};
use crate::sensors::types::{
    AdapterState, DeviceKind, ListenerToken, Result, SelectedDevice, SensorError,
};

/// Transport step that can fail or pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    RequestDevice,
    ConnectGatt,
    GetService,
    GetCharacteristic,
    StartNotifications,
    Write,
}

/// A fake peripheral handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPeripheral {
    pub id: String,
    pub name: String,
}

/// A fake GATT server handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockServer {
    pub device_id: String,
}

/// A fake resolved service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockService {
    pub device_id: String,
    pub uuid: Uuid,
}

/// A fake resolved characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCharacteristic {
    pub device_id: String,
    pub uuid: Uuid,
}

/// Pause point handed out by [`MockTransport::pause_next`].
#[derive(Debug, Default)]
pub struct MockGate {
    reached: Notify,
    resume: Notify,
}

impl MockGate {
    /// Wait until the paused operation has been entered.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the paused operation continue.
    pub fn resume(&self) {
        self.resume.notify_one();
    }
}

#[derive(Debug)]
struct MockDevice {
    peripheral: MockPeripheral,
    service: Uuid,
    characteristics: Vec<Uuid>,
}

#[derive(Debug)]
struct MockState {
    supported: bool,
    adapter: AdapterState,
    devices: Vec<MockDevice>,
    failures: HashMap<MockOperation, SensorError>,
    gates: HashMap<MockOperation, Arc<MockGate>>,
    next_token: u64,
    notification_listeners: HashMap<ListenerToken, (MockCharacteristic, FrameSender)>,
    disconnect_listeners: HashMap<ListenerToken, (String, DisconnectSender)>,
    open_connections: HashMap<String, usize>,
    writes: Vec<(Uuid, Vec<u8>)>,
}

impl MockState {
    fn next_token(&mut self) -> ListenerToken {
        self.next_token += 1;
        ListenerToken(self.next_token)
    }

    fn device(&self, device_id: &str) -> Option<&MockDevice> {
        self.devices.iter().find(|d| d.peripheral.id == device_id)
    }
}

/// A mock BLE transport.
#[derive(Debug)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A supported, powered adapter with no devices in range.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                supported: true,
                adapter: AdapterState {
                    available: true,
                    enabled: true,
                },
                devices: Vec::new(),
                failures: HashMap::new(),
                gates: HashMap::new(),
                next_token: 0,
                notification_listeners: HashMap::new(),
                disconnect_listeners: HashMap::new(),
                open_connections: HashMap::new(),
                writes: Vec::new(),
            }),
        }
    }

    /// One device of every kind in range.
    pub async fn with_fitness_devices() -> Self {
        let transport = Self::new();
        transport
            .add_device(DeviceKind::Trainer, "trainer-1", "KICKR CORE")
            .await;
        transport
            .add_device(DeviceKind::PowerSensor, "power-1", "Assioma DUO")
            .await;
        transport
            .add_device(DeviceKind::HeartRateMonitor, "hrm-1", "HRM-Pro")
            .await;
        transport
    }

    /// Add a device exposing the standard characteristics for `kind`.
    pub async fn add_device(&self, kind: DeviceKind, id: &str, name: &str) {
        let mut characteristics = vec![kind.measurement_uuid()];
        if kind == DeviceKind::Trainer {
            characteristics.push(FTMS_CONTROL_POINT_UUID);
        }
        self.add_device_with_characteristics(kind, id, name, characteristics)
            .await;
    }

    /// Add a device exposing exactly `characteristics` under the kind's service.
    pub async fn add_device_with_characteristics(
        &self,
        kind: DeviceKind,
        id: &str,
        name: &str,
        characteristics: Vec<Uuid>,
    ) {
        self.state.lock().await.devices.push(MockDevice {
            peripheral: MockPeripheral {
                id: id.to_string(),
                name: name.to_string(),
            },
            service: kind.service_uuid(),
            characteristics,
        });
    }

    pub async fn set_supported(&self, supported: bool) {
        self.state.lock().await.supported = supported;
    }

    pub async fn set_adapter_state(&self, adapter: AdapterState) {
        self.state.lock().await.adapter = adapter;
    }

    /// Make the next call of `operation` fail with `error`.
    pub async fn fail_next(&self, operation: MockOperation, error: SensorError) {
        self.state.lock().await.failures.insert(operation, error);
    }

    /// Pause the next call of `operation` until the returned gate resumes it.
    pub async fn pause_next(&self, operation: MockOperation) -> Arc<MockGate> {
        let gate = Arc::new(MockGate::default());
        self.state
            .lock()
            .await
            .gates
            .insert(operation, gate.clone());
        gate
    }

    /// Deliver a frame to every subscription on the kind's measurement
    /// characteristic. Returns the number of subscriptions reached.
    pub async fn push_frame(&self, kind: DeviceKind, frame: &[u8]) -> usize {
        let uuid = kind.measurement_uuid();
        let state = self.state.lock().await;
        state
            .notification_listeners
            .values()
            .filter(|(characteristic, _)| characteristic.uuid == uuid)
            .filter(|(_, tx)| tx.send(frame.to_vec()).is_ok())
            .count()
    }

    /// Drop the link to a device as if it went out of range.
    pub async fn simulate_disconnect(&self, device_id: &str) -> bool {
        let mut state = self.state.lock().await;
        state.open_connections.remove(device_id);
        let mut fired = false;
        for (id, tx) in state.disconnect_listeners.values() {
            if id == device_id && tx.send(()).is_ok() {
                fired = true;
            }
        }
        fired
    }

    pub async fn notification_listener_count(&self) -> usize {
        self.state.lock().await.notification_listeners.len()
    }

    pub async fn disconnect_listener_count(&self) -> usize {
        self.state.lock().await.disconnect_listeners.len()
    }

    pub async fn open_connection_count(&self) -> usize {
        self.state.lock().await.open_connections.values().sum()
    }

    /// Every successful write, in order, with its characteristic.
    pub async fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.state.lock().await.writes.clone()
    }

    /// Apply any gate, then any injected failure, for `operation`.
    async fn checkpoint(&self, operation: MockOperation) -> Result<()> {
        let gate = self.state.lock().await.gates.remove(&operation);
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.resume.notified().await;
        }

        match self.state.lock().await.failures.remove(&operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    type Device = MockPeripheral;
    type Server = MockServer;
    type Service = MockService;
    type Characteristic = MockCharacteristic;

    async fn is_supported(&self) -> bool {
        self.state.lock().await.supported
    }

    async fn adapter_state(&self) -> Result<AdapterState> {
        Ok(self.state.lock().await.adapter)
    }

    async fn request_device(&self, service: Uuid) -> Result<SelectedDevice<MockPeripheral>> {
        self.checkpoint(MockOperation::RequestDevice).await?;

        let state = self.state.lock().await;
        let device = state
            .devices
            .iter()
            .find(|d| d.service == service)
            .ok_or(SensorError::UserCancelled)?;

        Ok(SelectedDevice {
            handle: device.peripheral.clone(),
            device_id: device.peripheral.id.clone(),
            name: device.peripheral.name.clone(),
        })
    }

    async fn connect_gatt(&self, device: &MockPeripheral) -> Result<MockServer> {
        self.checkpoint(MockOperation::ConnectGatt).await?;

        let mut state = self.state.lock().await;
        *state
            .open_connections
            .entry(device.id.clone())
            .or_insert(0) += 1;

        Ok(MockServer {
            device_id: device.id.clone(),
        })
    }

    async fn disconnect_gatt(&self, server: &MockServer) {
        let mut state = self.state.lock().await;
        if let Some(count) = state.open_connections.get_mut(&server.device_id) {
            *count -= 1;
            if *count == 0 {
                state.open_connections.remove(&server.device_id);
            }
        }
    }

    async fn get_service(&self, server: &MockServer, service: Uuid) -> Result<MockService> {
        self.checkpoint(MockOperation::GetService).await?;

        let state = self.state.lock().await;
        match state.device(&server.device_id) {
            Some(device) if device.service == service => Ok(MockService {
                device_id: server.device_id.clone(),
                uuid: service,
            }),
            _ => Err(SensorError::ServiceNotFound(service)),
        }
    }

    async fn get_characteristic(
        &self,
        service: &MockService,
        characteristic: Uuid,
    ) -> Result<MockCharacteristic> {
        self.checkpoint(MockOperation::GetCharacteristic).await?;

        let state = self.state.lock().await;
        match state.device(&service.device_id) {
            Some(device) if device.characteristics.contains(&characteristic) => {
                Ok(MockCharacteristic {
                    device_id: service.device_id.clone(),
                    uuid: characteristic,
                })
            }
            _ => Err(SensorError::CharacteristicNotFound(characteristic)),
        }
    }

    async fn start_notifications(
        &self,
        characteristic: &MockCharacteristic,
        frames: FrameSender,
    ) -> Result<ListenerToken> {
        self.checkpoint(MockOperation::StartNotifications).await?;

        let mut state = self.state.lock().await;
        let token = state.next_token();
        state
            .notification_listeners
            .insert(token, (characteristic.clone(), frames));
        Ok(token)
    }

    async fn stop_notifications(&self, _characteristic: &MockCharacteristic, token: ListenerToken) {
        if self
            .state
            .lock()
            .await
            .notification_listeners
            .remove(&token)
            .is_none()
        {
            tracing::warn!("Unknown notification listener {:?}", token);
        }
    }

    async fn on_disconnected(
        &self,
        device: &MockPeripheral,
        signal: DisconnectSender,
    ) -> ListenerToken {
        let mut state = self.state.lock().await;
        let token = state.next_token();
        state
            .disconnect_listeners
            .insert(token, (device.id.clone(), signal));
        token
    }

    async fn remove_disconnect_listener(&self, _device: &MockPeripheral, token: ListenerToken) {
        self.state.lock().await.disconnect_listeners.remove(&token);
    }

    async fn write_characteristic(
        &self,
        characteristic: &MockCharacteristic,
        bytes: &[u8],
    ) -> Result<()> {
        self.checkpoint(MockOperation::Write).await?;

        self.state
            .lock()
            .await
            .writes
            .push((characteristic.uuid, bytes.to_vec()));
        Ok(())
    }
}

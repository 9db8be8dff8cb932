//! BLE transport backed by `btleplug`.
//!
//! Device selection is a filtered scan: the first peripheral advertising the
//! requested service (and matching the configured preferred name or id, if
//! any) within the scan timeout is chosen. A scan that finds nothing counts as
//! a cancelled selection.
//!
//! The adapter runs a single scan, so selections for different kinds share it.
//! Its filter is the union of the services still being searched for, and it
//! is stopped only when the last selection finishes.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::sensors::transport::{BleTransport, DisconnectSender, FrameSender};
use crate::sensors::types::{
    AdapterState, DeviceKind, ListenerToken, Result, SelectedDevice, SensorConfig, SensorError,
};

/// A resolved GATT service.
#[derive(Debug, Clone)]
pub struct BtleService {
    peripheral: Peripheral,
    uuid: Uuid,
}

/// A resolved GATT characteristic.
#[derive(Debug, Clone)]
pub struct BtleCharacteristic {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

/// Transport over the first BLE adapter of the host.
pub struct BtleTransport {
    adapter: Option<Adapter>,
    config: SensorConfig,
    next_token: AtomicU64,
    notification_tasks: Mutex<HashMap<ListenerToken, JoinHandle<()>>>,
    disconnect_tasks: Mutex<HashMap<ListenerToken, JoinHandle<()>>>,
    scans: Mutex<ActiveScans>,
}

/// Services wanted by the selections currently sharing the adapter scan.
#[derive(Debug, Default)]
struct ActiveScans {
    services: HashMap<Uuid, usize>,
}

impl ActiveScans {
    fn is_scanning(&self) -> bool {
        !self.services.is_empty()
    }

    /// Register a selection for `service`.
    ///
    /// Returns the filter to (re)start the scan with, or `None` when the
    /// running scan already covers the service.
    fn join(&mut self, service: Uuid) -> Option<ScanFilter> {
        let count = self.services.entry(service).or_insert(0);
        *count += 1;
        (*count == 1).then(|| self.filter())
    }

    /// Unregister a selection. Returns true once no selection needs the scan.
    fn leave(&mut self, service: Uuid) -> bool {
        if let Some(count) = self.services.get_mut(&service) {
            *count -= 1;
            if *count == 0 {
                self.services.remove(&service);
            }
        }
        !self.is_scanning()
    }

    fn filter(&self) -> ScanFilter {
        let mut services: Vec<Uuid> = self.services.keys().copied().collect();
        services.sort();
        ScanFilter { services }
    }
}

/// Whether a device name or id contains the preferred-device substring.
fn matches_preferred(name: &str, device_id: &str, filter: &str) -> bool {
    name.contains(filter) || device_id.contains(filter)
}

impl BtleTransport {
    /// Initialize the BLE adapter.
    ///
    /// A host without an adapter still yields a transport; it reports itself
    /// as unsupported.
    pub async fn new(config: SensorConfig) -> Self {
        tracing::info!("Initializing BLE transport");

        let adapter = match Self::first_adapter().await {
            Ok(adapter) => {
                tracing::info!("BLE adapter initialized");
                Some(adapter)
            }
            Err(e) => {
                tracing::warn!("No usable BLE adapter: {}", e);
                None
            }
        };

        Self {
            adapter,
            config,
            next_token: AtomicU64::new(1),
            notification_tasks: Mutex::new(HashMap::new()),
            disconnect_tasks: Mutex::new(HashMap::new()),
            scans: Mutex::new(ActiveScans::default()),
        }
    }

    async fn first_adapter() -> Result<Adapter> {
        let manager = Manager::new()
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))?;

        adapters
            .into_iter()
            .next()
            .ok_or(SensorError::UnsupportedTransport)
    }

    fn adapter(&self) -> Result<&Adapter> {
        self.adapter.as_ref().ok_or(SensorError::UnsupportedTransport)
    }

    fn next_token(&self) -> ListenerToken {
        ListenerToken(self.next_token.fetch_add(1, Ordering::SeqCst))
    }

    /// Check whether a peripheral advertises `service` and passes the filter.
    async fn classify_peripheral(
        peripheral: &Peripheral,
        service: Uuid,
        preferred: Option<&str>,
    ) -> Option<SelectedDevice<Peripheral>> {
        let properties = peripheral.properties().await.ok()??;

        if !properties.services.contains(&service) {
            return None;
        }

        let device_id = peripheral.id().to_string();
        let name = properties
            .local_name
            .unwrap_or_else(|| "Unknown Sensor".to_string());

        if let Some(filter) = preferred {
            if !matches_preferred(&name, &device_id, filter) {
                return None;
            }
        }

        Some(SelectedDevice {
            handle: peripheral.clone(),
            device_id,
            name,
        })
    }

    /// Wait for the first matching peripheral seen by the running scan.
    async fn wait_for_device(
        adapter: &Adapter,
        service: Uuid,
        preferred: Option<&str>,
    ) -> Option<SelectedDevice<Peripheral>> {
        let mut events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Failed to get adapter events: {}", e);
                return None;
            }
        };

        // Peripherals cached from an earlier scan never emit DeviceDiscovered.
        if let Ok(known) = adapter.peripherals().await {
            for peripheral in known {
                let candidate = Self::classify_peripheral(&peripheral, service, preferred).await;
                if let Some(device) = candidate {
                    return Some(device);
                }
            }
        }

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };

            let Ok(peripheral) = adapter.peripheral(&id).await else {
                continue;
            };

            if let Some(device) = Self::classify_peripheral(&peripheral, service, preferred).await {
                return Some(device);
            }
        }

        None
    }
}

#[async_trait]
impl BleTransport for BtleTransport {
    type Device = Peripheral;
    type Server = Peripheral;
    type Service = BtleService;
    type Characteristic = BtleCharacteristic;

    async fn is_supported(&self) -> bool {
        self.adapter.is_some()
    }

    async fn adapter_state(&self) -> Result<AdapterState> {
        let adapter = self.adapter()?;
        let state = adapter
            .adapter_state()
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))?;

        Ok(AdapterState {
            available: true,
            enabled: state == CentralState::PoweredOn,
        })
    }

    async fn request_device(&self, service: Uuid) -> Result<SelectedDevice<Peripheral>> {
        let adapter = self.adapter()?;
        let preferred = DeviceKind::ALL
            .into_iter()
            .find(|kind| kind.service_uuid() == service)
            .and_then(|kind| self.config.preferred_device(kind));

        tracing::info!("Scanning for service {}", service);

        {
            let mut scans = self.scans.lock().await;
            let restart = scans.is_scanning();
            if let Some(filter) = scans.join(service) {
                if restart {
                    if let Err(e) = adapter.stop_scan().await {
                        tracing::warn!("Failed to stop scan before widening it: {}", e);
                    }
                }
                if let Err(e) = adapter.start_scan(filter).await {
                    scans.leave(service);
                    return Err(SensorError::Transport(e.to_string()));
                }
            }
        }

        let found = tokio::time::timeout(
            self.config.scan_timeout,
            Self::wait_for_device(adapter, service, preferred),
        )
        .await;

        if self.scans.lock().await.leave(service) {
            if let Err(e) = adapter.stop_scan().await {
                tracing::warn!("Failed to stop scan: {}", e);
            }
        }

        match found {
            Ok(Some(device)) => Ok(device),
            _ => Err(SensorError::UserCancelled),
        }
    }

    async fn connect_gatt(&self, device: &Peripheral) -> Result<Peripheral> {
        let connected = device
            .is_connected()
            .await
            .map_err(|e| SensorError::GattConnectFailed(e.to_string()))?;

        if !connected {
            device
                .connect()
                .await
                .map_err(|e| SensorError::GattConnectFailed(e.to_string()))?;
        }

        device
            .discover_services()
            .await
            .map_err(|e| SensorError::GattConnectFailed(e.to_string()))?;

        Ok(device.clone())
    }

    async fn disconnect_gatt(&self, server: &Peripheral) {
        if let Err(e) = server.disconnect().await {
            tracing::warn!("Failed to disconnect {}: {}", server.id(), e);
        }
    }

    async fn get_service(&self, server: &Peripheral, service: Uuid) -> Result<BtleService> {
        server
            .services()
            .iter()
            .find(|s| s.uuid == service)
            .map(|s| BtleService {
                peripheral: server.clone(),
                uuid: s.uuid,
            })
            .ok_or(SensorError::ServiceNotFound(service))
    }

    async fn get_characteristic(
        &self,
        service: &BtleService,
        characteristic: Uuid,
    ) -> Result<BtleCharacteristic> {
        service
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service.uuid)
            .map(|c| BtleCharacteristic {
                peripheral: service.peripheral.clone(),
                characteristic: c,
            })
            .ok_or(SensorError::CharacteristicNotFound(characteristic))
    }

    async fn start_notifications(
        &self,
        characteristic: &BtleCharacteristic,
        frames: FrameSender,
    ) -> Result<ListenerToken> {
        let peripheral = &characteristic.peripheral;

        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| SensorError::NotificationStartFailed(e.to_string()))?;

        peripheral
            .subscribe(&characteristic.characteristic)
            .await
            .map_err(|e| SensorError::NotificationStartFailed(e.to_string()))?;

        tracing::debug!("Subscribed to characteristic: {}", characteristic.characteristic.uuid);

        let uuid = characteristic.characteristic.uuid;
        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                if frames.send(notification.value).is_err() {
                    break;
                }
            }
        });

        let token = self.next_token();
        self.notification_tasks.lock().await.insert(token, task);
        Ok(token)
    }

    async fn stop_notifications(&self, characteristic: &BtleCharacteristic, token: ListenerToken) {
        if let Some(task) = self.notification_tasks.lock().await.remove(&token) {
            task.abort();
        }

        if let Err(e) = characteristic
            .peripheral
            .unsubscribe(&characteristic.characteristic)
            .await
        {
            tracing::warn!(
                "Failed to unsubscribe from {}: {}",
                characteristic.characteristic.uuid,
                e
            );
        }
    }

    async fn on_disconnected(
        &self,
        device: &Peripheral,
        signal: DisconnectSender,
    ) -> ListenerToken {
        let token = self.next_token();

        let Some(adapter) = self.adapter.clone() else {
            return token;
        };
        let id = device.id();

        let task = tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(dropped) = event {
                    if dropped == id {
                        let _ = signal.send(());
                        break;
                    }
                }
            }
        });

        self.disconnect_tasks.lock().await.insert(token, task);
        token
    }

    async fn remove_disconnect_listener(&self, _device: &Peripheral, token: ListenerToken) {
        if let Some(task) = self.disconnect_tasks.lock().await.remove(&token) {
            task.abort();
        }
    }

    async fn write_characteristic(
        &self,
        characteristic: &BtleCharacteristic,
        bytes: &[u8],
    ) -> Result<()> {
        characteristic
            .peripheral
            .write(&characteristic.characteristic, bytes, WriteType::WithResponse)
            .await
            .map_err(|e| SensorError::WriteFailed(e.to_string()))
    }
}

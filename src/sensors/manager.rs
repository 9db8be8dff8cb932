//! Connection manager for the trainer, power meter and heart rate monitor.
//!
//! Holds one slot per [`DeviceKind`] with its status, last error, connected
//! device info and at most one [`DeviceSession`]. Every update to a slot
//! happens inside a single critical section so readers never see a
//! half-written entry. Starting a new attempt always releases the previous
//! session of that kind first.

use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

use chrono::Utc;
use crossbeam::channel::Receiver;

use crate::sensors::control::ControlWriter;
use crate::sensors::events::EventBus;
use crate::sensors::session::{DeviceSession, DroppedCallback};
use crate::sensors::transport::BleTransport;
use crate::sensors::types::{
    ConnectedDeviceInfo, ConnectionStatus, DeviceKind, EnvironmentStatus, Result, SensorConfig,
    SensorError, SensorEvent,
};

/// State of one device kind.
struct KindSlot<T: BleTransport> {
    status: ConnectionStatus,
    error: Option<String>,
    device: Option<ConnectedDeviceInfo>,
    session: Option<Arc<DeviceSession<T>>>,
}

impl<T: BleTransport> Default for KindSlot<T> {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Idle,
            error: None,
            device: None,
            session: None,
        }
    }
}

impl<T: BleTransport> KindSlot<T> {
    fn owns(&self, session: &DeviceSession<T>) -> bool {
        self.session
            .as_ref()
            .is_some_and(|current| current.id() == session.id())
    }
}

struct Inner<T: BleTransport> {
    config: SensorConfig,
    transport: Arc<T>,
    events: Arc<EventBus>,
    slots: Mutex<HashMap<DeviceKind, KindSlot<T>>>,
    environment: Mutex<EnvironmentStatus>,
    next_session_id: AtomicU64,
}

/// Manages BLE sensor connections, one per device kind.
///
/// Cheap to clone; clones share the same state.
pub struct ConnectionManager<T: BleTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: BleTransport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: BleTransport> ConnectionManager<T> {
    /// Create a new connection manager.
    pub fn new(transport: Arc<T>, config: SensorConfig) -> Self {
        let slots = DeviceKind::ALL
            .iter()
            .map(|kind| (*kind, KindSlot::default()))
            .collect();

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                events: Arc::new(EventBus::new()),
                slots: Mutex::new(slots),
                environment: Mutex::new(EnvironmentStatus::default()),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Create a new connection manager with default configuration.
    pub fn with_defaults(transport: Arc<T>) -> Self {
        Self::new(transport, SensorConfig::default())
    }

    /// Subscribe to readings, status changes and errors.
    pub async fn subscribe(&self) -> Receiver<SensorEvent> {
        self.inner.events.subscribe().await
    }

    /// Last environment snapshot taken by [`Self::refresh_environment`].
    pub async fn environment(&self) -> EnvironmentStatus {
        *self.inner.environment.lock().await
    }

    /// Query the transport for BLE support and adapter state.
    pub async fn refresh_environment(&self) -> EnvironmentStatus {
        let supports_transport = self.inner.transport.is_supported().await;

        let adapter = if supports_transport {
            match self.inner.transport.adapter_state().await {
                Ok(adapter) => adapter,
                Err(e) => {
                    tracing::warn!("Failed to query adapter state: {}", e);
                    Default::default()
                }
            }
        } else {
            Default::default()
        };

        let environment = EnvironmentStatus {
            supports_transport,
            available: adapter.available,
            enabled: adapter.enabled,
        };
        *self.inner.environment.lock().await = environment;

        tracing::debug!("BLE environment: {:?}", environment);
        environment
    }

    /// Status of every kind.
    pub async fn status(&self) -> HashMap<DeviceKind, ConnectionStatus> {
        self.inner
            .slots
            .lock()
            .await
            .iter()
            .map(|(kind, slot)| (*kind, slot.status))
            .collect()
    }

    pub async fn status_of(&self, kind: DeviceKind) -> ConnectionStatus {
        self.inner
            .slots
            .lock()
            .await
            .get(&kind)
            .map(|slot| slot.status)
            .unwrap_or_default()
    }

    pub async fn is_connected(&self, kind: DeviceKind) -> bool {
        self.status_of(kind).await == ConnectionStatus::Connected
    }

    /// Last error of every kind.
    pub async fn errors(&self) -> HashMap<DeviceKind, Option<String>> {
        self.inner
            .slots
            .lock()
            .await
            .iter()
            .map(|(kind, slot)| (*kind, slot.error.clone()))
            .collect()
    }

    /// Connected device of every kind.
    pub async fn connected_devices(&self) -> HashMap<DeviceKind, Option<ConnectedDeviceInfo>> {
        self.inner
            .slots
            .lock()
            .await
            .iter()
            .map(|(kind, slot)| (*kind, slot.device.clone()))
            .collect()
    }

    /// Connect a device of the given kind.
    ///
    /// Any session already held for `kind` is released first. Failures are
    /// recorded in the error map and the kind moves to `Error`; the error is
    /// also returned for callers that want it. An attempt overtaken by a newer
    /// `connect`/`disconnect` returns `Superseded` and leaves state alone.
    pub async fn connect(&self, kind: DeviceKind) -> Result<()> {
        let session_id = self.inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        let session = DeviceSession::new(
            session_id,
            kind,
            self.inner.transport.clone(),
            self.inner.events.clone(),
            self.dropped_callback(kind, session_id),
        );

        tracing::info!("Connecting {}", kind);

        let previous = {
            let mut slots = self.inner.slots.lock().await;
            let slot = slots.entry(kind).or_default();
            slot.status = ConnectionStatus::Requesting;
            slot.error = None;
            slot.device = None;
            slot.session.replace(session.clone())
        };
        self.publish_status(kind, ConnectionStatus::Requesting).await;

        if let Some(previous) = previous {
            tracing::debug!("Releasing previous {} session before reconnecting", kind);
            previous.release().await;
        }

        if !self.inner.transport.is_supported().await {
            return self.fail(&session, SensorError::UnsupportedTransport).await;
        }

        let selected = match session.select_device().await {
            Ok(selected) => selected,
            Err(e) => return self.fail(&session, e).await,
        };

        if !self
            .advance(&session, ConnectionStatus::Connecting, None)
            .await
        {
            session.release().await;
            return Err(SensorError::Superseded);
        }

        if let Err(e) = session.establish().await {
            return self.fail(&session, e).await;
        }

        let info = ConnectedDeviceInfo {
            device_id: selected.device_id,
            name: selected.name,
            connected: true,
            connected_at: Utc::now(),
        };
        tracing::info!("Connected {}: {} ({})", kind, info.name, info.device_id);

        if !self
            .advance(&session, ConnectionStatus::Connected, Some(info))
            .await
        {
            session.release().await;
            return Err(SensorError::Superseded);
        }

        if kind == DeviceKind::Trainer
            && self.inner.config.request_control_on_connect
            && session.has_control().await
        {
            let _ = ControlWriter::new(&session).request_control().await;
        }

        Ok(())
    }

    /// Disconnect the device of the given kind.
    ///
    /// A no-op when the kind is already idle.
    pub async fn disconnect(&self, kind: DeviceKind) {
        let session = {
            let mut slots = self.inner.slots.lock().await;
            let slot = slots.entry(kind).or_default();
            if slot.status == ConnectionStatus::Idle && slot.session.is_none() {
                return;
            }
            slot.status = ConnectionStatus::Idle;
            slot.error = None;
            slot.device = None;
            slot.session.take()
        };

        tracing::info!("Disconnecting {}", kind);

        if let Some(session) = session {
            session.release().await;
        }
        self.publish_status(kind, ConnectionStatus::Idle).await;
    }

    /// Disconnect every kind.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down ConnectionManager");

        for kind in DeviceKind::ALL {
            self.disconnect(kind).await;
        }
    }

    /// Set the trainer's ERG target power. Failures are logged only.
    pub async fn set_target_power(&self, watts: f64) {
        match self.trainer_session().await {
            Some(session) => {
                let _ = ControlWriter::new(&session).set_target_power(watts).await;
            }
            None => tracing::warn!(
                "Ignoring target power {}W: {}",
                watts,
                SensorError::NotConnected
            ),
        }
    }

    /// Set the trainer's resistance level. Failures are logged only.
    pub async fn set_resistance(&self, level: f64) {
        match self.trainer_session().await {
            Some(session) => {
                let _ = ControlWriter::new(&session).set_resistance(level).await;
            }
            None => tracing::warn!("Ignoring resistance {}: {}", level, SensorError::NotConnected),
        }
    }

    async fn trainer_session(&self) -> Option<Arc<DeviceSession<T>>> {
        self.inner
            .slots
            .lock()
            .await
            .get(&DeviceKind::Trainer)
            .and_then(|slot| slot.session.clone())
    }

    /// Move a still-current attempt to `status`. Returns false if superseded.
    async fn advance(
        &self,
        session: &DeviceSession<T>,
        status: ConnectionStatus,
        device: Option<ConnectedDeviceInfo>,
    ) -> bool {
        let kind = session.kind();
        {
            let mut slots = self.inner.slots.lock().await;
            let slot = slots.entry(kind).or_default();
            if !slot.owns(session) {
                tracing::debug!("{} session {} superseded", kind, session.id());
                return false;
            }
            slot.status = status;
            slot.device = device;
        }
        self.publish_status(kind, status).await;
        true
    }

    /// Record a failed attempt, unless a newer one already replaced it.
    async fn fail(&self, session: &DeviceSession<T>, error: SensorError) -> Result<()> {
        let kind = session.kind();
        session.release().await;

        let current = {
            let mut slots = self.inner.slots.lock().await;
            let slot = slots.entry(kind).or_default();
            let current = slot.owns(session) && error != SensorError::Superseded;
            if current {
                slot.session = None;
                slot.status = ConnectionStatus::Error;
                slot.error = Some(error.to_string());
                slot.device = None;
            }
            current
        };

        if current {
            tracing::error!("Failed to connect {}: {}", kind, error);
            self.inner
                .events
                .publish(SensorEvent::Error {
                    kind,
                    message: error.to_string(),
                })
                .await;
            self.publish_status(kind, ConnectionStatus::Error).await;
        } else {
            tracing::debug!("Discarding result of superseded {} attempt: {}", kind, error);
        }

        Err(error)
    }

    /// The device dropped the link; the session has already released itself.
    async fn handle_dropped(&self, kind: DeviceKind, session_id: u64) {
        {
            let mut slots = self.inner.slots.lock().await;
            let slot = slots.entry(kind).or_default();
            let owned = slot
                .session
                .as_ref()
                .is_some_and(|session| session.id() == session_id);
            if !owned {
                return;
            }
            slot.session = None;
            slot.status = ConnectionStatus::Idle;
            slot.error = None;
            slot.device = None;
        }

        tracing::info!("{} connection lost", kind);
        self.publish_status(kind, ConnectionStatus::Idle).await;
    }

    fn dropped_callback(&self, kind: DeviceKind, session_id: u64) -> DroppedCallback {
        let inner: Weak<Inner<T>> = Arc::downgrade(&self.inner);

        Arc::new(move || {
            let inner = inner.clone();
            async move {
                if let Some(inner) = inner.upgrade() {
                    ConnectionManager { inner }
                        .handle_dropped(kind, session_id)
                        .await;
                }
            }
            .boxed()
        })
    }

    async fn publish_status(&self, kind: DeviceKind, status: ConnectionStatus) {
        self.inner
            .events
            .publish(SensorEvent::StatusChanged { kind, status })
            .await;
    }
}

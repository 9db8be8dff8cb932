//! Live connection resources for one device.
//!
//! A [`DeviceSession`] walks the transport through selection, GATT connect,
//! service and characteristic resolution and notification start. Every handle
//! is recorded the moment it is acquired so that [`DeviceSession::release`]
//! can tear down a half-built session from any task. Sessions are single use:
//! once released they never reconnect.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::sensors::events::EventBus;
use crate::sensors::ftms::{decode_frame, FTMS_CONTROL_POINT_UUID};
use crate::sensors::transport::BleTransport;
use crate::sensors::types::{
    DeviceKind, ListenerToken, Result, SelectedDevice, SensorError, SensorEvent,
};

/// Invoked after a device-initiated disconnect has released the session.
pub type DroppedCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Handles held by a session.
struct SessionResources<T: BleTransport> {
    device: Option<SelectedDevice<T::Device>>,
    server: Option<T::Server>,
    characteristic: Option<T::Characteristic>,
    control: Option<T::Characteristic>,
    /// Subscription and the characteristic it must be stopped on.
    notification: Option<(T::Characteristic, ListenerToken)>,
    /// Disconnect listener and the device it was registered on.
    disconnect_listener: Option<(T::Device, ListenerToken)>,
    frame_pump: Option<JoinHandle<()>>,
}

impl<T: BleTransport> Default for SessionResources<T> {
    fn default() -> Self {
        Self {
            device: None,
            server: None,
            characteristic: None,
            control: None,
            notification: None,
            disconnect_listener: None,
            frame_pump: None,
        }
    }
}

impl<T: BleTransport> SessionResources<T> {
    fn is_empty(&self) -> bool {
        self.device.is_none()
            && self.server.is_none()
            && self.characteristic.is_none()
            && self.notification.is_none()
            && self.disconnect_listener.is_none()
            && self.frame_pump.is_none()
    }
}

/// One connection attempt and, if it succeeds, the live connection.
pub struct DeviceSession<T: BleTransport> {
    id: u64,
    kind: DeviceKind,
    transport: Arc<T>,
    events: Arc<EventBus>,
    on_dropped: DroppedCallback,
    resources: Mutex<SessionResources<T>>,
    released: AtomicBool,
    connected: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl<T: BleTransport> std::fmt::Debug for DeviceSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("connected", &self.is_connected())
            .field("released", &self.is_released())
            .finish()
    }
}

impl<T: BleTransport> DeviceSession<T> {
    /// Create an idle session. Nothing is acquired until [`Self::begin`].
    pub fn new(
        id: u64,
        kind: DeviceKind,
        transport: Arc<T>,
        events: Arc<EventBus>,
        on_dropped: DroppedCallback,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            id,
            kind,
            transport,
            events,
            on_dropped,
            resources: Mutex::new(SessionResources::default()),
            released: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            shutdown,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Notifications are running.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Identifier and name of the selected device, if any.
    pub async fn device(&self) -> Option<(String, String)> {
        self.resources
            .lock()
            .await
            .device
            .as_ref()
            .map(|d| (d.device_id.clone(), d.name.clone()))
    }

    /// Whether a control characteristic was resolved.
    pub async fn has_control(&self) -> bool {
        self.resources.lock().await.control.is_some()
    }

    /// Run the whole connect sequence.
    ///
    /// Returns once notifications are confirmed started. On any failure the
    /// partially acquired resources are released before the error is returned.
    pub async fn begin(self: &Arc<Self>) -> Result<SelectedDevice<T::Device>> {
        let device = self.select_device().await?;
        self.establish().await?;
        Ok(device)
    }

    /// Select a device and start watching it for disconnects.
    pub async fn select_device(self: &Arc<Self>) -> Result<SelectedDevice<T::Device>> {
        let result = self.try_select_device().await;
        if result.is_err() {
            self.release().await;
        }
        result
    }

    /// Connect GATT, resolve the characteristics and start notifications.
    pub async fn establish(self: &Arc<Self>) -> Result<()> {
        let result = self.try_establish().await;
        if result.is_err() {
            self.release().await;
        }
        result
    }

    async fn try_select_device(self: &Arc<Self>) -> Result<SelectedDevice<T::Device>> {
        self.ensure_live()?;

        tracing::debug!("Requesting {} device", self.kind);
        let device = self
            .transport
            .request_device(self.kind.service_uuid())
            .await?;
        self.retain(|res| res.device = Some(device.clone())).await?;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let token = self.transport.on_disconnected(&device.handle, signal_tx).await;
        self.retain(|res| res.disconnect_listener = Some((device.handle.clone(), token)))
            .await?;
        self.spawn_disconnect_watcher(signal_rx);

        tracing::debug!("Selected {} device: {}", self.kind, device.name);
        Ok(device)
    }

    async fn try_establish(self: &Arc<Self>) -> Result<()> {
        self.ensure_live()?;

        let device = self
            .resources
            .lock()
            .await
            .device
            .as_ref()
            .map(|d| d.handle.clone())
            .ok_or(SensorError::NotConnected)?;

        let server = self.transport.connect_gatt(&device).await?;
        self.retain(|res| res.server = Some(server.clone())).await?;

        let service = self
            .transport
            .get_service(&server, self.kind.service_uuid())
            .await?;
        self.ensure_live()?;

        let characteristic = self
            .transport
            .get_characteristic(&service, self.kind.measurement_uuid())
            .await?;
        self.retain(|res| res.characteristic = Some(characteristic.clone()))
            .await?;

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let token = self
            .transport
            .start_notifications(&characteristic, frames_tx)
            .await?;
        let pump = self.spawn_frame_pump(frames_rx);
        self.retain(|res| {
            res.notification = Some((characteristic.clone(), token));
            res.frame_pump = Some(pump);
        })
        .await?;

        if self.kind == DeviceKind::Trainer {
            match self
                .transport
                .get_characteristic(&service, FTMS_CONTROL_POINT_UUID)
                .await
            {
                Ok(control) => self.retain(|res| res.control = Some(control)).await?,
                Err(e) => tracing::warn!("Trainer has no control point, writes disabled: {}", e),
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("{} notifications started", self.kind);
        Ok(())
    }

    /// Write to the control characteristic.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(SensorError::NotConnected);
        }

        let control = self
            .resources
            .lock()
            .await
            .control
            .clone()
            .ok_or(SensorError::NotConnected)?;

        self.transport.write_characteristic(&control, bytes).await
    }

    /// Tear down everything this session holds.
    ///
    /// Idempotent, and safe on a session that never acquired anything.
    pub async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        let resources = std::mem::take(&mut *self.resources.lock().await);
        if resources.is_empty() {
            return;
        }

        tracing::debug!("Releasing {} session {}", self.kind, self.id);

        if let Some(pump) = resources.frame_pump {
            pump.abort();
        }

        if let Some((characteristic, token)) = &resources.notification {
            self.transport.stop_notifications(characteristic, *token).await;
        }

        if let Some((device, token)) = &resources.disconnect_listener {
            self.transport.remove_disconnect_listener(device, *token).await;
        }

        if let Some(server) = &resources.server {
            self.transport.disconnect_gatt(server).await;
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_released() {
            Err(SensorError::Superseded)
        } else {
            Ok(())
        }
    }

    /// Record freshly acquired resources, then make sure no release raced us.
    async fn retain<F>(&self, store: F) -> Result<()>
    where
        F: FnOnce(&mut SessionResources<T>),
    {
        store(&mut *self.resources.lock().await);

        if self.is_released() {
            // A release ran while the resource was being acquired; drain it too.
            self.release().await;
            return Err(SensorError::Superseded);
        }
        Ok(())
    }

    fn spawn_frame_pump(&self, mut frames: mpsc::UnboundedReceiver<Vec<u8>>) -> JoinHandle<()> {
        let kind = self.kind;
        let events = self.events.clone();

        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                match decode_frame(kind, &frame) {
                    Ok(reading) => {
                        events.publish(SensorEvent::Reading { kind, reading }).await;
                    }
                    Err(e) => {
                        tracing::warn!("Dropping {} frame {:02X?}: {}", kind, frame, e);
                    }
                }
            }
            tracing::debug!("{} notification stream closed", kind);
        })
    }

    fn spawn_disconnect_watcher(self: &Arc<Self>, mut signal: mpsc::UnboundedReceiver<()>) {
        let session = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let fired = tokio::select! {
                fired = signal.recv() => fired,
                _ = async { let _ = shutdown.wait_for(|released| *released).await; } => None,
            };

            if fired.is_some() {
                if let Some(session) = session.upgrade() {
                    session.handle_remote_disconnect().await;
                }
            }
        });
    }

    async fn handle_remote_disconnect(&self) {
        if self.is_released() {
            return;
        }

        tracing::info!("{} disconnected by device", self.kind);
        self.release().await;
        (self.on_dropped)().await;
    }
}

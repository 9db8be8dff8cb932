//! Frame generators and polling helpers shared by the integration tests.

use crossbeam::channel::Receiver;
use ridelink::sensors::{
    ConnectionManager, ConnectionStatus, DeviceKind, MockTransport, SensorEvent,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(2);

/// Mock sensor data generator for testing.
#[derive(Debug, Clone)]
pub struct MockSensorData {
    /// Power in watts
    pub power: i16,
    /// Cadence in 0.5 RPM units
    pub cadence: u16,
    /// Speed in 0.01 m/s units
    pub speed: u16,
    /// Heart rate in BPM
    pub heart_rate: u16,
}

impl Default for MockSensorData {
    fn default() -> Self {
        Self {
            power: 200,
            cadence: 180, // 90 RPM
            speed: 1000,  // 36.0 km/h
            heart_rate: 145,
        }
    }
}

impl MockSensorData {
    /// Trainer frame with speed, cadence and power (flags 0x0045).
    pub fn trainer_frame(&self) -> Vec<u8> {
        let mut data = vec![0x45, 0x00];
        data.extend_from_slice(&self.speed.to_le_bytes());
        data.extend_from_slice(&self.cadence.to_le_bytes());
        data.extend_from_slice(&self.power.to_le_bytes());
        data
    }

    /// Power meter frame carrying power only (flags 0x0040).
    pub fn power_frame(&self) -> Vec<u8> {
        let mut data = vec![0x40, 0x00];
        data.extend_from_slice(&self.power.to_le_bytes());
        data
    }

    /// Heart rate frame, 8-bit when the value fits.
    pub fn heart_rate_frame(&self) -> Vec<u8> {
        match u8::try_from(self.heart_rate) {
            Ok(bpm) => vec![0x00, bpm],
            Err(_) => {
                let mut data = vec![0x01];
                data.extend_from_slice(&self.heart_rate.to_le_bytes());
                data
            }
        }
    }
}

/// Manager over a mock transport with one device of each kind.
pub async fn fitness_manager() -> (Arc<MockTransport>, ConnectionManager<MockTransport>) {
    let transport = Arc::new(MockTransport::with_fitness_devices().await);
    let manager = ConnectionManager::with_defaults(transport.clone());
    (transport, manager)
}

/// Wait for the first event matching `pred`, skipping others.
pub async fn wait_for_event<F>(events: &Receiver<SensorEvent>, pred: F) -> SensorEvent
where
    F: Fn(&SensorEvent) -> bool,
{
    let deadline = Instant::now() + TIMEOUT;
    loop {
        while let Ok(event) = events.try_recv() {
            if pred(&event) {
                return event;
            }
        }
        assert!(Instant::now() < deadline, "timed out waiting for event");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until `kind` reports `status`.
pub async fn wait_for_status(
    manager: &ConnectionManager<MockTransport>,
    kind: DeviceKind,
    status: ConnectionStatus,
) {
    let deadline = Instant::now() + TIMEOUT;
    while manager.status_of(kind).await != status {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {} to become {}",
            kind,
            status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Every status change published so far for `kind`, in order.
pub fn drain_statuses(events: &Receiver<SensorEvent>, kind: DeviceKind) -> Vec<ConnectionStatus> {
    events
        .try_iter()
        .filter_map(|event| match event {
            SensorEvent::StatusChanged { kind: k, status } if k == kind => Some(status),
            _ => None,
        })
        .collect()
}

//! Trainer control writes routed through the connection manager.

use ridelink::sensors::ftms::{FTMS_CONTROL_POINT_UUID, INDOOR_BIKE_DATA_UUID};
use ridelink::sensors::{
    ConnectionManager, ConnectionStatus, DeviceKind, MockOperation, MockTransport, SensorConfig,
    SensorError,
};
use std::sync::Arc;

use crate::sensor_mock::fitness_manager;

/// Manager that skips the request-control handshake so only test writes show.
async fn quiet_trainer() -> (Arc<MockTransport>, ConnectionManager<MockTransport>) {
    let transport = Arc::new(MockTransport::with_fitness_devices().await);
    let config = SensorConfig {
        request_control_on_connect: false,
        ..Default::default()
    };
    let manager = ConnectionManager::new(transport.clone(), config);
    manager.connect(DeviceKind::Trainer).await.unwrap();
    (transport, manager)
}

fn payloads(writes: Vec<(uuid::Uuid, Vec<u8>)>) -> Vec<Vec<u8>> {
    writes
        .into_iter()
        .inspect(|(uuid, _)| assert_eq!(*uuid, FTMS_CONTROL_POINT_UUID))
        .map(|(_, bytes)| bytes)
        .collect()
}

#[tokio::test]
async fn test_target_power_is_clamped() {
    let (transport, manager) = quiet_trainer().await;

    manager.set_target_power(-50.0).await;
    manager.set_target_power(5000.0).await;
    manager.set_target_power(199.6).await;

    assert_eq!(
        payloads(transport.writes().await),
        vec![
            vec![0x05, 0x00, 0x00],
            vec![0x05, 0xD0, 0x07],
            vec![0x05, 0xC8, 0x00],
        ]
    );
}

#[tokio::test]
async fn test_resistance_is_clamped() {
    let (transport, manager) = quiet_trainer().await;

    manager.set_resistance(150.0).await;
    manager.set_resistance(-1.0).await;
    manager.set_resistance(42.4).await;

    assert_eq!(
        payloads(transport.writes().await),
        vec![vec![0x04, 100], vec![0x04, 0], vec![0x04, 42]]
    );
}

#[tokio::test]
async fn test_failed_write_keeps_session() {
    let (transport, manager) = quiet_trainer().await;
    transport
        .fail_next(
            MockOperation::Write,
            SensorError::WriteFailed("ATT error 0x80".to_string()),
        )
        .await;

    manager.set_target_power(250.0).await;
    assert_eq!(
        manager.status_of(DeviceKind::Trainer).await,
        ConnectionStatus::Connected
    );
    assert_eq!(manager.errors().await[&DeviceKind::Trainer], None);

    manager.set_target_power(250.0).await;
    assert_eq!(
        payloads(transport.writes().await),
        vec![vec![0x05, 0xFA, 0x00]]
    );
}

#[tokio::test]
async fn test_write_without_trainer_is_ignored() {
    let (transport, manager) = fitness_manager().await;
    manager.connect(DeviceKind::HeartRateMonitor).await.unwrap();

    manager.set_target_power(200.0).await;
    manager.set_resistance(10.0).await;

    assert!(transport.writes().await.is_empty());
}

#[tokio::test]
async fn test_trainer_without_control_point_still_connects() {
    let transport = Arc::new(MockTransport::new());
    transport
        .add_device_with_characteristics(
            DeviceKind::Trainer,
            "trainer-2",
            "Basic Trainer",
            vec![INDOOR_BIKE_DATA_UUID],
        )
        .await;
    let manager = ConnectionManager::with_defaults(transport.clone());

    manager.connect(DeviceKind::Trainer).await.unwrap();
    manager.set_target_power(200.0).await;

    assert!(manager.is_connected(DeviceKind::Trainer).await);
    assert!(transport.writes().await.is_empty());
}

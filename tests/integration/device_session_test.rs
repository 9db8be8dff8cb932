//! Device session lifecycle against the mock transport.

use futures::FutureExt;
use ridelink::sensors::session::DroppedCallback;
use ridelink::sensors::{
    DeviceKind, DeviceSession, EventBus, MockOperation, MockTransport, SensorError,
};
use std::sync::Arc;
use tokio::sync::mpsc;

fn noop_dropped() -> DroppedCallback {
    Arc::new(|| async {}.boxed())
}

async fn session_for(
    kind: DeviceKind,
    on_dropped: DroppedCallback,
) -> (Arc<MockTransport>, Arc<DeviceSession<MockTransport>>) {
    let transport = Arc::new(MockTransport::with_fitness_devices().await);
    let session = DeviceSession::new(
        1,
        kind,
        transport.clone(),
        Arc::new(EventBus::new()),
        on_dropped,
    );
    (transport, session)
}

#[tokio::test]
async fn test_begin_acquires_one_of_each() {
    let (transport, session) = session_for(DeviceKind::Trainer, noop_dropped()).await;

    let device = session.begin().await.unwrap();

    assert_eq!(device.device_id, "trainer-1");
    assert!(session.is_connected());
    assert!(session.has_control().await);
    assert_eq!(transport.notification_listener_count().await, 1);
    assert_eq!(transport.disconnect_listener_count().await, 1);
    assert_eq!(transport.open_connection_count().await, 1);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let (transport, session) = session_for(DeviceKind::HeartRateMonitor, noop_dropped()).await;
    session.begin().await.unwrap();

    session.release().await;
    session.release().await;

    assert!(!session.is_connected());
    assert!(session.device().await.is_none());
    assert_eq!(transport.notification_listener_count().await, 0);
    assert_eq!(transport.disconnect_listener_count().await, 0);
    assert_eq!(transport.open_connection_count().await, 0);
}

#[tokio::test]
async fn test_release_without_resources_is_noop() {
    let (transport, session) = session_for(DeviceKind::PowerSensor, noop_dropped()).await;

    session.release().await;

    assert!(session.is_released());
    assert_eq!(transport.open_connection_count().await, 0);
}

#[tokio::test]
async fn test_failure_mid_begin_releases_partial_resources() {
    let (transport, session) = session_for(DeviceKind::Trainer, noop_dropped()).await;
    let service = DeviceKind::Trainer.service_uuid();
    transport
        .fail_next(MockOperation::GetService, SensorError::ServiceNotFound(service))
        .await;

    let result = session.begin().await;

    assert!(matches!(result, Err(SensorError::ServiceNotFound(uuid)) if uuid == service));
    assert_eq!(transport.disconnect_listener_count().await, 0);
    assert_eq!(transport.open_connection_count().await, 0);
}

#[tokio::test]
async fn test_notification_start_failure_is_reported() {
    let (transport, session) = session_for(DeviceKind::HeartRateMonitor, noop_dropped()).await;
    transport
        .fail_next(
            MockOperation::StartNotifications,
            SensorError::NotificationStartFailed("CCCD write rejected".to_string()),
        )
        .await;

    assert!(matches!(
        session.begin().await,
        Err(SensorError::NotificationStartFailed(_))
    ));
    assert_eq!(transport.notification_listener_count().await, 0);
    assert_eq!(transport.open_connection_count().await, 0);
}

#[tokio::test]
async fn test_write_requires_connection() {
    let (_transport, session) = session_for(DeviceKind::Trainer, noop_dropped()).await;
    assert_eq!(session.write(&[0x00]).await, Err(SensorError::NotConnected));
}

#[tokio::test]
async fn test_write_without_control_point_is_not_connected() {
    let (_transport, session) = session_for(DeviceKind::HeartRateMonitor, noop_dropped()).await;
    session.begin().await.unwrap();

    assert_eq!(session.write(&[0x05, 0x64, 0x00]).await, Err(SensorError::NotConnected));
}

#[tokio::test]
async fn test_device_drop_releases_and_reports() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let on_dropped: DroppedCallback = Arc::new(move || {
        let tx = tx.clone();
        async move {
            let _ = tx.send(());
        }
        .boxed()
    });
    let (transport, session) = session_for(DeviceKind::PowerSensor, on_dropped).await;
    session.begin().await.unwrap();

    transport.simulate_disconnect("power-1").await;

    assert_eq!(rx.recv().await, Some(()));
    assert!(session.is_released());
    assert_eq!(transport.notification_listener_count().await, 0);
    assert_eq!(transport.disconnect_listener_count().await, 0);
}

#[tokio::test]
async fn test_release_before_begin_is_superseded() {
    let (transport, session) = session_for(DeviceKind::Trainer, noop_dropped()).await;
    session.release().await;

    assert_eq!(session.begin().await.err(), Some(SensorError::Superseded));
    assert_eq!(transport.disconnect_listener_count().await, 0);
}

#[tokio::test]
async fn test_release_during_notification_start_stops_subscription() {
    let (transport, session) = session_for(DeviceKind::Trainer, noop_dropped()).await;
    let gate = transport
        .pause_next(MockOperation::StartNotifications)
        .await;

    let attempt = {
        let session = session.clone();
        tokio::spawn(async move { session.begin().await.map(|device| device.device_id) })
    };

    gate.reached().await;
    session.release().await;
    gate.resume();

    assert_eq!(attempt.await.unwrap(), Err(SensorError::Superseded));
    assert_eq!(transport.notification_listener_count().await, 0);
    assert_eq!(transport.disconnect_listener_count().await, 0);
    assert_eq!(transport.open_connection_count().await, 0);
}

//! Unit tests for device kind identifiers.

use ridelink::sensors::ftms::{
    CYCLING_POWER_MEASUREMENT_UUID, CYCLING_POWER_SERVICE_UUID, FTMS_CONTROL_POINT_UUID,
    FTMS_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
    INDOOR_BIKE_DATA_UUID,
};
use ridelink::sensors::{ConnectionStatus, DeviceKind};
use uuid::Uuid;

/// Maps a service UUID back to a DeviceKind.
fn classify_service(service_uuid: &Uuid) -> Option<DeviceKind> {
    DeviceKind::ALL
        .into_iter()
        .find(|kind| kind.service_uuid() == *service_uuid)
}

#[test]
fn test_ftms_uuids() {
    // Fitness Machine 0x1826, Indoor Bike Data 0x2AD2, Control Point 0x2AD9
    assert_eq!(
        FTMS_SERVICE_UUID,
        Uuid::from_u128(0x00001826_0000_1000_8000_00805f9b34fb)
    );
    assert_eq!(
        INDOOR_BIKE_DATA_UUID,
        Uuid::from_u128(0x00002ad2_0000_1000_8000_00805f9b34fb)
    );
    assert_eq!(
        FTMS_CONTROL_POINT_UUID,
        Uuid::from_u128(0x00002ad9_0000_1000_8000_00805f9b34fb)
    );
}

#[test]
fn test_kind_identifiers() {
    assert_eq!(DeviceKind::Trainer.service_uuid(), FTMS_SERVICE_UUID);
    assert_eq!(DeviceKind::Trainer.measurement_uuid(), INDOOR_BIKE_DATA_UUID);

    assert_eq!(
        DeviceKind::PowerSensor.service_uuid(),
        CYCLING_POWER_SERVICE_UUID
    );
    assert_eq!(
        DeviceKind::PowerSensor.measurement_uuid(),
        CYCLING_POWER_MEASUREMENT_UUID
    );

    assert_eq!(
        DeviceKind::HeartRateMonitor.service_uuid(),
        HEART_RATE_SERVICE_UUID
    );
    assert_eq!(
        DeviceKind::HeartRateMonitor.measurement_uuid(),
        HEART_RATE_MEASUREMENT_UUID
    );
}

#[test]
fn test_classify_service() {
    assert_eq!(
        classify_service(&HEART_RATE_SERVICE_UUID),
        Some(DeviceKind::HeartRateMonitor)
    );
    assert_eq!(
        classify_service(&Uuid::from_u128(0x00001816_0000_1000_8000_00805f9b34fb)),
        None
    );
}

#[test]
fn test_initial_status_is_idle() {
    assert_eq!(ConnectionStatus::default(), ConnectionStatus::Idle);
    assert!(!ConnectionStatus::Idle.has_session());
    assert!(ConnectionStatus::Connecting.has_session());
}

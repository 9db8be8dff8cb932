//! Unit tests for FTMS control point encoding.

use ridelink::sensors::ftms::{
    build_request_control, build_set_target_power, build_set_target_resistance,
    FtmsControlOpcode, MAX_RESISTANCE_LEVEL, MAX_TARGET_POWER_WATTS,
};

#[test]
fn test_request_control() {
    assert_eq!(build_request_control(), [0x00]);
}

#[test]
fn test_set_target_power() {
    // 250W = 0x00FA little-endian
    assert_eq!(build_set_target_power(250.0), [0x05, 0xFA, 0x00]);
}

#[test]
fn test_set_target_power_clamps_low() {
    assert_eq!(build_set_target_power(-50.0), [0x05, 0x00, 0x00]);
}

#[test]
fn test_set_target_power_clamps_high() {
    // 2000W = 0x07D0
    assert_eq!(build_set_target_power(5000.0), [0x05, 0xD0, 0x07]);
    assert_eq!(
        build_set_target_power(MAX_TARGET_POWER_WATTS),
        build_set_target_power(5000.0)
    );
}

#[test]
fn test_set_target_power_rounds() {
    assert_eq!(build_set_target_power(199.5), [0x05, 0xC8, 0x00]);
    assert_eq!(build_set_target_power(199.4), [0x05, 0xC7, 0x00]);
}

#[test]
fn test_set_target_power_non_finite() {
    assert_eq!(build_set_target_power(f64::NAN), [0x05, 0x00, 0x00]);
    assert_eq!(build_set_target_power(f64::INFINITY), [0x05, 0x00, 0x00]);
}

#[test]
fn test_set_resistance() {
    assert_eq!(build_set_target_resistance(42.0), [0x04, 42]);
}

#[test]
fn test_set_resistance_clamps() {
    assert_eq!(build_set_target_resistance(150.0), [0x04, 100]);
    assert_eq!(build_set_target_resistance(-3.0), [0x04, 0]);
    assert_eq!(
        build_set_target_resistance(MAX_RESISTANCE_LEVEL),
        [0x04, 100]
    );
}

#[test]
fn test_opcodes() {
    assert_eq!(FtmsControlOpcode::RequestControl as u8, 0x00);
    assert_eq!(FtmsControlOpcode::SetTargetResistanceLevel as u8, 0x04);
    assert_eq!(FtmsControlOpcode::SetTargetPower as u8, 0x05);
}

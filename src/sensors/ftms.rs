//! GATT identifiers, notification frame decoding and control-point encoding.
//!
//! Trainer and power meter frames share one layout: a 16-bit flags word
//! followed by the fields its bits announce, in order. Heart-rate frames use
//! the standard 8-bit flags with an 8- or 16-bit value.

use uuid::Uuid;

use crate::sensors::types::{
    DeviceKind, HeartRateReading, Result, SensorError, SensorReading, TrainerReading,
};

/// FTMS Service UUID (0x1826)
pub const FTMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1826_0000_1000_8000_0080_5f9b_34fb);

/// Indoor Bike Data Characteristic UUID (0x2AD2)
pub const INDOOR_BIKE_DATA_UUID: Uuid = Uuid::from_u128(0x0000_2ad2_0000_1000_8000_0080_5f9b_34fb);

/// Fitness Machine Control Point UUID (0x2AD9)
pub const FTMS_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2ad9_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement UUID (0x2A63)
pub const CYCLING_POWER_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a63_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Measurement UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

/// Upper bound for target power commands, in watts.
pub const MAX_TARGET_POWER_WATTS: f64 = 2000.0;

/// Upper bound for resistance commands.
pub const MAX_RESISTANCE_LEVEL: f64 = 100.0;

const SPEED_PRESENT: u16 = 0x0001;
const CADENCE_PRESENT: u16 = 0x0004;
const POWER_PRESENT: u16 = 0x0040;

const HR_VALUE_FORMAT_U16: u8 = 0x01;

/// Trainer frame flags (first 2 bytes).
#[derive(Debug, Clone, Copy)]
struct TrainerFlags {
    speed_present: bool,
    cadence_present: bool,
    power_present: bool,
}

impl TrainerFlags {
    fn from_bits(flags: u16) -> Self {
        Self {
            speed_present: flags & SPEED_PRESENT != 0,
            cadence_present: flags & CADENCE_PRESENT != 0,
            power_present: flags & POWER_PRESENT != 0,
        }
    }

    /// Frame length the flags require.
    fn frame_len(self) -> usize {
        2 + [self.speed_present, self.cadence_present, self.power_present]
            .iter()
            .filter(|present| **present)
            .count()
            * 2
    }
}

/// Little-endian cursor over a frame that fails with `MalformedFrame`.
struct FrameReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FrameReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.offset + N;
        let bytes = self
            .data
            .get(self.offset..end)
            .ok_or(SensorError::MalformedFrame {
                needed: end,
                actual: self.data.len(),
            })?;
        self.offset = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    fn i16(&mut self) -> Result<i16> {
        self.take::<2>().map(i16::from_le_bytes)
    }
}

/// Decode a notification frame for the given device kind.
pub fn decode_frame(kind: DeviceKind, data: &[u8]) -> Result<SensorReading> {
    match kind {
        DeviceKind::Trainer | DeviceKind::PowerSensor => {
            decode_trainer_frame(data).map(SensorReading::Trainer)
        }
        DeviceKind::HeartRateMonitor => decode_heart_rate_frame(data).map(SensorReading::HeartRate),
    }
}

/// Decode a trainer / power meter frame.
///
/// The data format is:
/// - Bytes 0-1: Flags
/// - 0x0001: speed, u16 in 0.01 m/s
/// - 0x0004: cadence, u16 in 0.5 RPM
/// - 0x0040: power, i16 in watts
pub fn decode_trainer_frame(data: &[u8]) -> Result<TrainerReading> {
    let mut reader = FrameReader::new(data);
    let flags = TrainerFlags::from_bits(reader.u16()?);

    // Reject up front so a short frame never yields a partial reading.
    let needed = flags.frame_len();
    if data.len() < needed {
        return Err(SensorError::MalformedFrame {
            needed,
            actual: data.len(),
        });
    }

    let mut reading = TrainerReading::default();

    if flags.speed_present {
        let hundredths = reader.u16()?;
        reading.speed_kph = Some((f32::from(hundredths) / 100.0) * 3.6);
    }

    if flags.cadence_present {
        let half_rpm = reader.u16()?;
        reading.cadence_rpm = Some(f32::from(half_rpm) / 2.0);
    }

    if flags.power_present {
        reading.power_watts = Some(reader.i16()?);
    }

    Ok(reading)
}

/// Decode a Heart Rate Measurement frame.
pub fn decode_heart_rate_frame(data: &[u8]) -> Result<HeartRateReading> {
    let mut reader = FrameReader::new(data);
    let flags = reader.u8()?;

    let bpm = if flags & HR_VALUE_FORMAT_U16 != 0 {
        reader.u16()?
    } else {
        u16::from(reader.u8()?)
    };

    Ok(HeartRateReading { bpm })
}

/// FTMS Control Point opcodes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtmsControlOpcode {
    /// Request control of the fitness machine
    RequestControl = 0x00,
    /// Set target resistance level
    SetTargetResistanceLevel = 0x04,
    /// Set target power
    SetTargetPower = 0x05,
}

/// Build a control point command to request control.
pub fn build_request_control() -> [u8; 1] {
    [FtmsControlOpcode::RequestControl as u8]
}

/// Build a control point command to set target power (ERG mode).
///
/// The target is clamped to `0..=2000` W and rounded to whole watts.
pub fn build_set_target_power(target_watts: f64) -> [u8; 3] {
    let watts = clamp_round(target_watts, MAX_TARGET_POWER_WATTS) as u16;
    let [lo, hi] = watts.to_le_bytes();
    [FtmsControlOpcode::SetTargetPower as u8, lo, hi]
}

/// Build a control point command to set the resistance level.
///
/// The level is clamped to `0..=100` and rounded.
pub fn build_set_target_resistance(level: f64) -> [u8; 2] {
    let level = clamp_round(level, MAX_RESISTANCE_LEVEL) as u8;
    [FtmsControlOpcode::SetTargetResistanceLevel as u8, level]
}

fn clamp_round(value: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, max).round()
}

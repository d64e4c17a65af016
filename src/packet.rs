//! # Sensor Packet Decoding Module
//!
//! Parses the fixed little-endian notification payloads sent by the wearable
//! into typed samples with back-computed timestamps.
//!
//! ## Layout
//! ```text
//! PPG / ACC:   [u32 frame counter][N x sample]
//!              PPG sample = red:u32 ir:u32 green:u32       (12 bytes)
//!              ACC sample = x:i16 y:i16 z:i16              (6 bytes)
//! Temperature: [u32 frame counter][i16 centidegrees]
//! Battery:     [i32 millivolts]                            (no frame counter)
//! ```
//!
//! ## Timestamps
//! Samples in a batch carry no individual timestamps. They are ordered oldest
//! first and spaced at the fixed sample interval, so the newest sample lands on
//! the notification time and earlier ones are spread backwards from it.
//!
//! Every decode returns a `Result`; malformed input never panics.

use crate::error::DecodeError;
use crate::sample::{AccelSample, PpgSample};
use serde::Serialize;

const FRAME_COUNTER_BYTES: usize = 4;
const PPG_SAMPLE_BYTES: usize = 12;
const ACC_SAMPLE_BYTES: usize = 6;
const TEMPERATURE_BYTES: usize = 2;
const BATTERY_BYTES: usize = 4;

/// PPG sampling interval (50 Hz)
pub const PPG_SAMPLE_INTERVAL_MS: u64 = 20;
/// Accelerometer sampling interval (100 Hz)
pub const ACC_SAMPLE_INTERVAL_MS: u64 = 10;

pub const BATTERY_MIN_MV: i32 = 2500;
pub const BATTERY_MAX_MV: i32 = 4500;
const BATTERY_EMPTY_MV: i32 = 3000;
const BATTERY_SPAN_MV: i32 = 1200;

/// Decoded optical packet
#[derive(Debug, Clone, PartialEq)]
pub struct PpgPacket {
    pub frame_counter: u32,
    pub samples: Vec<PpgSample>,
}

/// Decoded accelerometer packet
#[derive(Debug, Clone, PartialEq)]
pub struct AccelPacket {
    pub frame_counter: u32,
    pub samples: Vec<AccelSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperatureData {
    pub frame_counter: u32,
    pub celsius: f64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatteryData {
    pub millivolts: i32,
    pub percentage: u8,
    pub timestamp: u64,
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_i16(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// Number of whole samples in a framed packet
///
/// Trailing bytes that do not form a full sample are ignored.
fn sample_count(bytes: &[u8], bytes_per_sample: usize) -> Result<usize, DecodeError> {
    let minimum = FRAME_COUNTER_BYTES + bytes_per_sample;
    if bytes.len() < minimum {
        return Err(DecodeError::InsufficientData {
            expected: minimum,
            actual: bytes.len(),
        });
    }

    let payload = bytes.len() - FRAME_COUNTER_BYTES;
    let count = payload / bytes_per_sample;
    if count == 0 {
        return Err(DecodeError::invalid("no complete samples in packet"));
    }
    if payload % bytes_per_sample != 0 {
        log::debug!(
            "Ignoring {} trailing bytes in {}-byte packet",
            payload % bytes_per_sample,
            bytes.len()
        );
    }
    Ok(count)
}

/// Timestamp of sample `index` in a batch of `count`, oldest first
///
/// `timestamp[i] = notification_time - (count - 1 - i) * interval`
pub fn sample_timestamp(notification_time: u64, index: usize, count: usize, interval_ms: u64) -> u64 {
    let steps_back = count.saturating_sub(1).saturating_sub(index) as u64;
    notification_time.saturating_sub(steps_back * interval_ms)
}

/// Decode an optical (red/IR/green) packet
pub fn decode_ppg_packet(bytes: &[u8], notification_time: u64) -> Result<PpgPacket, DecodeError> {
    let count = sample_count(bytes, PPG_SAMPLE_BYTES)?;
    let frame_counter = read_u32(bytes, 0);

    let mut samples = Vec::with_capacity(count);
    for i in 0..count {
        let offset = FRAME_COUNTER_BYTES + i * PPG_SAMPLE_BYTES;
        let channel = |delta: usize| {
            let raw = read_u32(bytes, offset + delta);
            i32::try_from(raw)
                .map_err(|_| DecodeError::invalid(format!("PPG value {} out of range", raw)))
        };
        samples.push(PpgSample {
            red: channel(0)?,
            ir: channel(4)?,
            green: channel(8)?,
            timestamp: sample_timestamp(notification_time, i, count, PPG_SAMPLE_INTERVAL_MS),
        });
    }

    log::trace!("PPG frame {}: {} samples", frame_counter, count);
    Ok(PpgPacket {
        frame_counter,
        samples,
    })
}

/// Decode a 3-axis accelerometer packet
pub fn decode_accel_packet(bytes: &[u8], notification_time: u64) -> Result<AccelPacket, DecodeError> {
    let count = sample_count(bytes, ACC_SAMPLE_BYTES)?;
    let frame_counter = read_u32(bytes, 0);

    let samples = (0..count)
        .map(|i| {
            let offset = FRAME_COUNTER_BYTES + i * ACC_SAMPLE_BYTES;
            AccelSample {
                x: read_i16(bytes, offset),
                y: read_i16(bytes, offset + 2),
                z: read_i16(bytes, offset + 4),
                timestamp: sample_timestamp(notification_time, i, count, ACC_SAMPLE_INTERVAL_MS),
            }
        })
        .collect();

    Ok(AccelPacket {
        frame_counter,
        samples,
    })
}

/// Decode a skin temperature packet (centidegrees Celsius)
pub fn decode_temperature_packet(
    bytes: &[u8],
    notification_time: u64,
) -> Result<TemperatureData, DecodeError> {
    let expected = FRAME_COUNTER_BYTES + TEMPERATURE_BYTES;
    if bytes.len() < expected {
        return Err(DecodeError::InsufficientData {
            expected,
            actual: bytes.len(),
        });
    }

    let raw = read_i16(bytes, FRAME_COUNTER_BYTES);
    Ok(TemperatureData {
        frame_counter: read_u32(bytes, 0),
        celsius: raw as f64 / 100.0,
        timestamp: notification_time,
    })
}

/// Map a battery voltage to a 0-100 charge estimate
pub fn battery_percentage(millivolts: i32) -> u8 {
    let pct = (millivolts - BATTERY_EMPTY_MV) * 100 / BATTERY_SPAN_MV;
    pct.clamp(0, 100) as u8
}

/// Decode a battery packet; voltages outside the plausible range are rejected
pub fn decode_battery_packet(bytes: &[u8], notification_time: u64) -> Result<BatteryData, DecodeError> {
    if bytes.len() < BATTERY_BYTES {
        return Err(DecodeError::InsufficientData {
            expected: BATTERY_BYTES,
            actual: bytes.len(),
        });
    }

    let millivolts = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if !(BATTERY_MIN_MV..=BATTERY_MAX_MV).contains(&millivolts) {
        return Err(DecodeError::invalid(format!(
            "battery voltage {} mV outside [{}, {}]",
            millivolts, BATTERY_MIN_MV, BATTERY_MAX_MV
        )));
    }

    Ok(BatteryData {
        millivolts,
        percentage: battery_percentage(millivolts),
        timestamp: notification_time,
    })
}

/// Decode a UTF-8 characteristic string (device name, firmware revision)
///
/// Control characters, including NUL padding, are stripped.
pub fn decode_string(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    let cleaned: String = text.chars().filter(|c| !c.is_control()).collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Encode optical samples in the device layout
pub fn encode_ppg_packet(frame_counter: u32, samples: &[PpgSample]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(FRAME_COUNTER_BYTES + samples.len() * PPG_SAMPLE_BYTES);
    bytes.extend_from_slice(&frame_counter.to_le_bytes());
    for s in samples {
        for value in [s.red, s.ir, s.green] {
            bytes.extend_from_slice(&(value.max(0) as u32).to_le_bytes());
        }
    }
    bytes
}

/// Encode accelerometer samples in the device layout
pub fn encode_accel_packet(frame_counter: u32, samples: &[AccelSample]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(FRAME_COUNTER_BYTES + samples.len() * ACC_SAMPLE_BYTES);
    bytes.extend_from_slice(&frame_counter.to_le_bytes());
    for s in samples {
        bytes.extend_from_slice(&s.x.to_le_bytes());
        bytes.extend_from_slice(&s.y.to_le_bytes());
        bytes.extend_from_slice(&s.z.to_le_bytes());
    }
    bytes
}

pub fn encode_temperature_packet(frame_counter: u32, celsius: f64) -> Vec<u8> {
    let mut bytes = frame_counter.to_le_bytes().to_vec();
    let centi = (celsius * 100.0).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
    bytes.extend_from_slice(&centi.to_le_bytes());
    bytes
}

pub fn encode_battery_packet(millivolts: i32) -> Vec<u8> {
    millivolts.to_le_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u32(bytes: &mut Vec<u8>, v: u32) {
        bytes.extend_from_slice(&v.to_le_bytes());
    }

    #[test]
    fn test_decode_ppg_two_samples() {
        let mut bytes = vec![0x07, 0x00, 0x00, 0x00];
        for v in [100, 200, 300, 110, 210, 310] {
            push_u32(&mut bytes, v);
        }
        let now = 1_700_000_000_000;

        let packet = decode_ppg_packet(&bytes, now).unwrap();

        assert_eq!(packet.frame_counter, 7);
        assert_eq!(packet.samples.len(), 2);
        assert_eq!(packet.samples[0].ir, 200);
        assert_eq!(packet.samples[0].red, 100);
        assert_eq!(packet.samples[0].green, 300);
        assert_eq!(packet.samples[0].timestamp, now - 20);
        assert_eq!(packet.samples[1].ir, 210);
        assert_eq!(packet.samples[1].timestamp, now);
    }

    #[test]
    fn test_decode_ppg_too_short() {
        let bytes = [0x01, 0x00, 0x00, 0x00, 0xAA, 0xBB];
        let err = decode_ppg_packet(&bytes, 0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InsufficientData {
                expected: 16,
                actual: 6
            }
        );
    }

    #[test]
    fn test_decode_ppg_ignores_trailing_bytes() {
        let mut bytes = vec![0, 0, 0, 0];
        for v in [1, 2, 3] {
            push_u32(&mut bytes, v);
        }
        bytes.extend_from_slice(&[9, 9, 9]);

        let packet = decode_ppg_packet(&bytes, 1000).unwrap();
        assert_eq!(packet.samples.len(), 1);
        assert_eq!(packet.samples[0].timestamp, 1000);
    }

    #[test]
    fn test_decode_ppg_rejects_values_beyond_i32() {
        let mut bytes = vec![0, 0, 0, 0];
        for v in [1, u32::MAX, 3] {
            push_u32(&mut bytes, v);
        }
        assert!(matches!(
            decode_ppg_packet(&bytes, 0),
            Err(DecodeError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_decode_accel_timestamps() {
        let samples = [
            AccelSample { x: -1, y: 2, z: -300, timestamp: 0 },
            AccelSample { x: 4, y: -5, z: 600, timestamp: 0 },
            AccelSample { x: 7, y: 8, z: 9, timestamp: 0 },
        ];
        let bytes = encode_accel_packet(3, &samples);

        let packet = decode_accel_packet(&bytes, 10_000).unwrap();

        assert_eq!(packet.frame_counter, 3);
        assert_eq!(packet.samples[0].x, -1);
        assert_eq!(packet.samples[0].z, -300);
        assert_eq!(packet.samples[0].timestamp, 9_980);
        assert_eq!(packet.samples[1].timestamp, 9_990);
        assert_eq!(packet.samples[2].timestamp, 10_000);
    }

    #[test]
    fn test_sample_timestamp_saturates() {
        assert_eq!(sample_timestamp(10, 0, 5, 20), 0);
    }

    #[test]
    fn test_decode_temperature() {
        let bytes = encode_temperature_packet(9, 36.54);
        let temp = decode_temperature_packet(&bytes, 500).unwrap();
        assert_eq!(temp.frame_counter, 9);
        assert!((temp.celsius - 36.54).abs() < 1e-9);

        let negative = encode_temperature_packet(0, -4.25);
        assert!((decode_temperature_packet(&negative, 0).unwrap().celsius + 4.25).abs() < 1e-9);

        assert!(matches!(
            decode_temperature_packet(&[0, 0, 0, 0, 1], 0),
            Err(DecodeError::InsufficientData { expected: 6, actual: 5 })
        ));
    }

    #[test]
    fn test_battery_range_rejection() {
        assert!(decode_battery_packet(&encode_battery_packet(2000), 0).ok().is_none());
        assert!(decode_battery_packet(&encode_battery_packet(5000), 0).ok().is_none());

        let battery = decode_battery_packet(&encode_battery_packet(3600), 77).unwrap();
        assert_eq!(battery.millivolts, 3600);
        assert_eq!(battery.percentage, 50);
        assert_eq!(battery.timestamp, 77);
    }

    #[test]
    fn test_battery_percentage_clamps() {
        assert_eq!(battery_percentage(2600), 0);
        assert_eq!(battery_percentage(4200), 100);
        assert_eq!(battery_percentage(4500), 100);
    }

    #[test]
    fn test_battery_too_short() {
        assert!(matches!(
            decode_battery_packet(&[1, 2], 0),
            Err(DecodeError::InsufficientData { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_decode_string_strips_control() {
        assert_eq!(decode_string(b"Band\x00\x00"), Some("Band".to_string()));
        assert_eq!(decode_string(b"v1.\n2"), Some("v1.2".to_string()));
        assert_eq!(decode_string(&[0xFF, 0xFE]), None);
        assert_eq!(decode_string(b"\x00\x00"), None);
    }
}

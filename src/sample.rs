//! # Sample Types Module
//!
//! Value types for individual sensor readings as they come off the decoder,
//! plus the per-sample input the detectors consume.
//!
//! All timestamps are milliseconds since the Unix epoch.

use serde::{Deserialize, Serialize};

/// One optical reading (red, infrared and green channels)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpgSample {
    pub red: i32,
    pub ir: i32,
    pub green: i32,
    pub timestamp: u64,
}

/// One 3-axis accelerometer reading in raw device units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccelSample {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub timestamp: u64,
}

impl AccelSample {
    pub fn snapshot(&self) -> AccelSnapshot {
        AccelSnapshot {
            x: self.x,
            y: self.y,
            z: self.z,
        }
    }
}

/// Accelerometer values without a timestamp, as stored inside event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccelSnapshot {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl AccelSnapshot {
    /// Euclidean magnitude in raw units
    pub fn magnitude(&self) -> f64 {
        let (x, y, z) = (self.x as f64, self.y as f64, self.z as f64);
        (x * x + y * y + z * z).sqrt()
    }
}

/// Any single reading produced by the packet decoder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Sample {
    Ppg(PpgSample),
    Accelerometer(AccelSample),
    Temperature { celsius: f64 },
    Battery { millivolts: i32 },
}

/// Per-sample input for the event and state detectors
///
/// The IR value drives classification; accelerometer and temperature are
/// snapshot context recorded at event boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrSample {
    pub ir: f64,
    pub timestamp: u64,
    pub accel: Option<AccelSnapshot>,
    pub temperature: Option<f64>,
}

impl IrSample {
    pub fn new(ir: f64, timestamp: u64) -> Self {
        Self {
            ir,
            timestamp,
            accel: None,
            temperature: None,
        }
    }

    pub fn with_accel(mut self, accel: AccelSnapshot) -> Self {
        self.accel = Some(accel);
        self
    }

    pub fn with_temperature(mut self, celsius: f64) -> Self {
        self.temperature = Some(celsius);
        self
    }
}

impl From<&PpgSample> for IrSample {
    fn from(sample: &PpgSample) -> Self {
        IrSample::new(sample.ir as f64, sample.timestamp)
    }
}

/// Convert a millisecond timestamp into a UTC date-time for display
pub fn timestamp_to_datetime(ms: u64) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::from_timestamp_millis(i64::try_from(ms).ok()?)
}

/// Current wall-clock time in milliseconds, used as a packet notification time
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

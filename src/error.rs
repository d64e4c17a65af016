//! # Error Types Module
//!
//! Centralized error handling for the myosense engine.
//! Provides one error type per concern with proper context and error chaining.
//!
//! ## Error Types
//! - `DecodeError`: Malformed or short sensor packets
//! - `CalibrationError`: Baseline calibration failures
//! - `FilterError`: Unrealizable filter parameters
//! - `ConfigError`: Configuration file I/O, parsing and validation errors
//!
//! ## Recovery
//! None of these are fatal. A rejected packet is dropped and the next one is
//! awaited; a failed calibration can simply be started again.

use std::fmt;

/// Errors that can occur while decoding a binary sensor packet
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Packet is shorter than the smallest valid payload
    InsufficientData { expected: usize, actual: usize },
    /// Packet is long enough but its content is structurally impossible
    InvalidData { reason: String },
}

impl DecodeError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        DecodeError::InvalidData {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InsufficientData { expected, actual } => {
                write!(
                    f,
                    "Insufficient packet data: expected at least {} bytes, got {}",
                    expected, actual
                )
            }
            DecodeError::InvalidData { reason } => {
                write!(f, "Invalid packet data: {}", reason)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Reasons a calibration attempt did not produce a baseline
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Fewer valid samples arrived than the configured minimum
    InsufficientSamples { collected: usize, required: usize },
    /// Coefficient of variation over the still period exceeded the limit
    Unstable { cv: f64 },
    /// The computed median fell outside the valid IR range
    InvalidBaseline { baseline: f64 },
}

impl CalibrationError {
    /// Short machine-friendly reason, stable across releases
    pub fn reason(&self) -> &'static str {
        match self {
            CalibrationError::InsufficientSamples { .. } => "insufficient samples",
            CalibrationError::Unstable { .. } => "signal unstable",
            CalibrationError::InvalidBaseline { .. } => "invalid baseline",
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::InsufficientSamples { collected, required } => {
                write!(
                    f,
                    "Calibration failed: insufficient samples ({} of {} required)",
                    collected, required
                )
            }
            CalibrationError::Unstable { cv } => {
                write!(
                    f,
                    "Calibration failed: signal unstable (CV {:.1}%)",
                    cv * 100.0
                )
            }
            CalibrationError::InvalidBaseline { baseline } => {
                write!(f, "Calibration failed: invalid baseline {:.0}", baseline)
            }
        }
    }
}

impl std::error::Error for CalibrationError {}

/// Filter parameters that cannot produce a stable design
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Cutoff must lie strictly between 0 and the Nyquist frequency
    InvalidCutoff { cutoff_hz: f64, nyquist_hz: f64 },
    /// Bandpass edges must satisfy low < high
    InvalidBand { low_hz: f64, high_hz: f64 },
    /// Sample rate must be positive
    InvalidSampleRate(f64),
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::InvalidCutoff { cutoff_hz, nyquist_hz } => {
                write!(
                    f,
                    "Cutoff {} Hz must be between 0 and Nyquist ({} Hz)",
                    cutoff_hz, nyquist_hz
                )
            }
            FilterError::InvalidBand { low_hz, high_hz } => {
                write!(f, "Invalid band: low edge {} Hz is not below high edge {} Hz", low_hz, high_hz)
            }
            FilterError::InvalidSampleRate(rate) => {
                write!(f, "Invalid sample rate: {} Hz", rate)
            }
        }
    }
}

impl std::error::Error for FilterError {}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
    /// Config parsed but holds values the engine cannot run with
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
            ConfigError::Invalid(msg) => {
                write!(f, "Invalid configuration: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

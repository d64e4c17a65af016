//! # myosense
//!
//! Real-time muscle-activity and device-state detection for an optical
//! wearable (PPG + accelerometer + temperature).
//!
//! Raw notifications are decoded, normalized against a calibrated IR
//! baseline and folded into compact event and state records instead of
//! being buffered. See `pipeline` for how the pieces are wired together.

pub mod biometrics;
pub mod calibration;
pub mod config;
pub mod error;
pub mod event_detector;
pub mod filter;
pub mod heart_rate;
pub mod ir_dc;
pub mod output;
pub mod packet;
pub mod pipeline;
pub mod sample;
pub mod simulator;
pub mod state_detector;
pub mod stats;
pub mod timeseries;

//! # Detector Output Module
//!
//! Records leaving the core. Detectors return a `DetectorOutput` from each
//! `process_sample` call; the pipeline enriches state transitions with the
//! latest device snapshot to build a `StateTransitionEvent`.

use crate::biometrics::SleepState;
use crate::calibration::CalibrationUpdate;
use crate::event_detector::MuscleActivityEvent;
use crate::packet::BatteryData;
use crate::sample::AccelSnapshot;
use crate::state_detector::{DeviceRecordingState, StateTransition};
use serde::Serialize;

/// Anything a detector can produce for one sample
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorOutput {
    Calibration(CalibrationUpdate),
    Event(MuscleActivityEvent),
    Transition(StateTransition),
}

/// Latest known device readings, kept current by the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub timestamp: u64,
    pub raw_ir: Option<f64>,
    pub ir_dc: Option<f64>,
    pub accel: Option<AccelSnapshot>,
    pub temperature: Option<f64>,
    pub battery: Option<BatteryData>,
    pub hr: Option<f64>,
    pub spo2: Option<f64>,
    pub perfusion_index: Option<f64>,
    pub sleep_state: Option<SleepState>,
}

impl DeviceSnapshot {
    /// Combine a committed transition with the current readings
    pub fn transition_event(
        &self,
        transition: &StateTransition,
        baseline: Option<f64>,
    ) -> StateTransitionEvent {
        let normalized_ir = match (self.raw_ir, baseline) {
            (Some(ir), Some(b)) if b > 0.0 => Some((ir - b) / b * 100.0),
            _ => None,
        };
        StateTransitionEvent {
            timestamp: transition.timestamp,
            previous_state: transition.previous,
            state: transition.new,
            raw_ir: self.raw_ir,
            normalized_ir,
            hr: self.hr,
            spo2: self.spo2,
            perfusion_index: self.perfusion_index,
            temperature: self.temperature,
            accel: self.accel,
            battery_millivolts: self.battery.map(|b| b.millivolts),
            battery_percentage: self.battery.map(|b| b.percentage),
            baseline,
        }
    }
}

/// A state transition together with the device readings at the time it was confirmed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransitionEvent {
    pub timestamp: u64,
    pub previous_state: DeviceRecordingState,
    pub state: DeviceRecordingState,
    pub raw_ir: Option<f64>,
    pub normalized_ir: Option<f64>,
    pub hr: Option<f64>,
    pub spo2: Option<f64>,
    pub perfusion_index: Option<f64>,
    pub temperature: Option<f64>,
    pub accel: Option<AccelSnapshot>,
    pub battery_millivolts: Option<i32>,
    pub battery_percentage: Option<u8>,
    pub baseline: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition() -> StateTransition {
        StateTransition {
            previous: DeviceRecordingState::Positioned,
            new: DeviceRecordingState::Activity,
            timestamp: 42_000,
        }
    }

    #[test]
    fn test_transition_event_from_snapshot() {
        let snapshot = DeviceSnapshot {
            timestamp: 41_990,
            raw_ir: Some(150_000.0),
            hr: Some(72.0),
            battery: Some(BatteryData {
                millivolts: 3_900,
                percentage: 75,
                timestamp: 40_000,
            }),
            ..Default::default()
        };

        let event = snapshot.transition_event(&transition(), Some(100_000.0));
        assert_eq!(event.timestamp, 42_000);
        assert_eq!(event.state, DeviceRecordingState::Activity);
        assert_eq!(event.previous_state, DeviceRecordingState::Positioned);
        assert!((event.normalized_ir.unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(event.hr, Some(72.0));
        assert_eq!(event.battery_percentage, Some(75));
        assert_eq!(event.spo2, None);
    }

    #[test]
    fn test_no_normalization_without_baseline() {
        let snapshot = DeviceSnapshot {
            raw_ir: Some(150_000.0),
            ..Default::default()
        };
        let event = snapshot.transition_event(&transition(), None);
        assert_eq!(event.normalized_ir, None);
        assert_eq!(event.baseline, None);
    }
}

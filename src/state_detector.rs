//! # Device State-Transition Detector
//!
//! Classifies the device into one of three recording states per sample and
//! commits a change only after the new target has held for the edge's debounce.
//!
//! ```text
//!                 2000 ms              1000 ms
//! DataStreaming ----------> Positioned ----------> Activity
//!               <----------            <----------
//!                 3000 ms              1000 ms
//! ```
//!
//! DataStreaming <-> Activity has no timer of its own; it waits for the sum of
//! the two edges it skips. A single sample back on the current state cancels
//! the pending change.

use crate::biometrics::{BiometricHistory, PositioningRule, SleepState};
use crate::calibration::{CalibrationManager, CalibrationState};
use crate::config::{BiometricsConfig, CalibrationConfig, Config, StateDebounceConfig, StateDetectorConfig};
use crate::output::DetectorOutput;
use crate::sample::IrSample;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recording states ordered by progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceRecordingState {
    DataStreaming,
    Positioned,
    Activity,
}

impl fmt::Display for DeviceRecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRecordingState::DataStreaming => write!(f, "Data streaming"),
            DeviceRecordingState::Positioned => write!(f, "Positioned"),
            DeviceRecordingState::Activity => write!(f, "Activity"),
        }
    }
}

/// A committed state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub previous: DeviceRecordingState,
    pub new: DeviceRecordingState,
    pub timestamp: u64,
}

impl StateDebounceConfig {
    /// Debounce for an ordered edge; non-adjacent edges sum the two they skip
    pub fn debounce_ms(&self, from: DeviceRecordingState, to: DeviceRecordingState) -> u64 {
        use DeviceRecordingState::*;
        match (from, to) {
            (DataStreaming, Positioned) => self.streaming_to_positioned_ms,
            (Positioned, Activity) => self.positioned_to_activity_ms,
            (Activity, Positioned) => self.activity_to_positioned_ms,
            (Positioned, DataStreaming) => self.positioned_to_streaming_ms,
            (DataStreaming, Activity) => {
                self.streaming_to_positioned_ms + self.positioned_to_activity_ms
            }
            (Activity, DataStreaming) => {
                self.activity_to_positioned_ms + self.positioned_to_streaming_ms
            }
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingTransition {
    target: DeviceRecordingState,
    since: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Machine {
    current: DeviceRecordingState,
    pending: Option<PendingTransition>,
}

impl Default for Machine {
    fn default() -> Self {
        Self {
            current: DeviceRecordingState::DataStreaming,
            pending: None,
        }
    }
}

impl Machine {
    /// Pure transition: `(machine, target, now) -> (machine, committed change)`
    fn advance(
        self,
        target: DeviceRecordingState,
        now: u64,
        debounce: &StateDebounceConfig,
    ) -> (Machine, Option<StateTransition>) {
        if target == self.current {
            return (
                Machine {
                    current: self.current,
                    pending: None,
                },
                None,
            );
        }

        let pending = match self.pending {
            Some(pending) if pending.target == target => pending,
            _ => PendingTransition { target, since: now },
        };

        if now.saturating_sub(pending.since) >= debounce.debounce_ms(self.current, target) {
            let transition = StateTransition {
                previous: self.current,
                new: target,
                timestamp: now,
            };
            (
                Machine {
                    current: target,
                    pending: None,
                },
                Some(transition),
            )
        } else {
            (
                Machine {
                    current: self.current,
                    pending: Some(pending),
                },
                None,
            )
        }
    }
}

pub struct StateTransitionDetector {
    config: StateDetectorConfig,
    calibration: CalibrationManager,
    biometrics: BiometricHistory,
    rule: PositioningRule,
    machine: Machine,
    transitions: u64,
}

impl StateTransitionDetector {
    pub fn new(
        config: StateDetectorConfig,
        calibration: CalibrationConfig,
        biometrics: &BiometricsConfig,
    ) -> Self {
        Self {
            config,
            calibration: CalibrationManager::new(calibration),
            biometrics: BiometricHistory::new(biometrics),
            rule: PositioningRule::for_state(biometrics),
            machine: Machine::default(),
            transitions: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.state_detector.clone(),
            config.calibration.clone(),
            &config.biometrics,
        )
    }

    pub fn current_state(&self) -> DeviceRecordingState {
        self.machine.current
    }

    /// Target state waiting out its debounce, if any
    pub fn pending_target(&self) -> Option<DeviceRecordingState> {
        self.machine.pending.map(|p| p.target)
    }

    /// Number of transitions committed since the last reset
    pub fn transition_count(&self) -> u64 {
        self.transitions
    }

    pub fn calibration(&self) -> &CalibrationManager {
        &self.calibration
    }

    pub fn calibration_state(&self) -> &CalibrationState {
        self.calibration.state()
    }

    pub fn start_calibration(&mut self) {
        self.calibration.start_calibration();
    }

    pub fn cancel_calibration(&mut self) {
        self.calibration.cancel_calibration();
    }

    pub fn restore_baseline(&mut self, baseline: f64) -> Result<(), crate::error::CalibrationError> {
        self.calibration.restore_baseline(baseline)
    }

    pub fn update_hr(&mut self, bpm: f64, timestamp: u64) {
        self.biometrics.update_hr(bpm, timestamp);
    }

    pub fn update_spo2(&mut self, percent: f64, timestamp: u64) {
        self.biometrics.update_spo2(percent, timestamp);
    }

    pub fn update_perfusion_index(&mut self, pi: f64, timestamp: u64) {
        self.biometrics.update_perfusion_index(pi, timestamp);
    }

    pub fn update_sleep(&mut self, state: SleepState, timestamp: u64) {
        self.biometrics.update_sleep(state, timestamp);
    }

    pub fn update_temperature(&mut self, celsius: f64, timestamp: u64) {
        self.biometrics.update_temperature(celsius, timestamp);
    }

    pub fn is_positioned(&self, t: u64) -> bool {
        self.biometrics.is_positioned(t, &self.rule)
    }

    /// State the sample points at, before debounce
    pub fn target_state(&self, ir: f64, t: u64) -> DeviceRecordingState {
        if !self.is_positioned(t) {
            return DeviceRecordingState::DataStreaming;
        }
        match self.calibration.normalize(ir) {
            Some(pct) if pct > self.config.activity_threshold_percent => {
                DeviceRecordingState::Activity
            }
            _ => DeviceRecordingState::Positioned,
        }
    }

    pub fn process_sample(&mut self, sample: &IrSample) -> Option<DetectorOutput> {
        if self.calibration.is_calibrating() {
            return self
                .calibration
                .add_sample(sample.ir, sample.timestamp)
                .map(DetectorOutput::Calibration);
        }

        let target = self.target_state(sample.ir, sample.timestamp);
        let (machine, transition) =
            self.machine
                .advance(target, sample.timestamp, &self.config.debounce);
        self.machine = machine;

        let transition = transition?;
        self.transitions += 1;
        log::info!(
            "Device state: {} -> {} at {}",
            transition.previous,
            transition.new,
            transition.timestamp
        );
        Some(DetectorOutput::Transition(transition))
    }

    /// Back to DataStreaming with nothing pending; calibration and biometrics are kept
    pub fn reset(&mut self) {
        self.machine = Machine::default();
        self.transitions = 0;
    }

    pub fn full_reset(&mut self) {
        self.reset();
        self.calibration.reset();
        self.biometrics.clear();
    }
}

impl Default for StateTransitionDetector {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeviceRecordingState::*;

    const BASELINE: f64 = 100_000.0;
    const ACTIVE_IR: f64 = 150_000.0;

    fn run(
        detector: &mut StateTransitionDetector,
        from: u64,
        to: u64,
        step: u64,
        ir: f64,
        transitions: &mut Vec<StateTransition>,
    ) {
        let mut t = from;
        while t < to {
            if let Some(DetectorOutput::Transition(tr)) =
                detector.process_sample(&IrSample::new(ir, t))
            {
                transitions.push(tr);
            }
            t += step;
        }
    }

    #[test]
    fn test_debounce_lookup() {
        let debounce = StateDebounceConfig::default();
        assert_eq!(debounce.debounce_ms(DataStreaming, Positioned), 2_000);
        assert_eq!(debounce.debounce_ms(Positioned, Activity), 1_000);
        assert_eq!(debounce.debounce_ms(Activity, Positioned), 1_000);
        assert_eq!(debounce.debounce_ms(Positioned, DataStreaming), 3_000);
        assert_eq!(debounce.debounce_ms(DataStreaming, Activity), 3_000);
        assert_eq!(debounce.debounce_ms(Activity, DataStreaming), 4_000);
    }

    #[test]
    fn test_state_order() {
        assert!(DataStreaming < Positioned);
        assert!(Positioned < Activity);
    }

    #[test]
    fn test_not_positioned_stays_streaming() {
        let mut detector = StateTransitionDetector::default();
        detector.restore_baseline(BASELINE).unwrap();
        let mut transitions = Vec::new();
        run(&mut detector, 0, 10_000, 20, ACTIVE_IR, &mut transitions);

        assert!(transitions.is_empty());
        assert_eq!(detector.current_state(), DataStreaming);
    }

    #[test]
    fn test_toggling_target_never_commits() {
        let mut detector = StateTransitionDetector::default();
        detector.restore_baseline(BASELINE).unwrap();
        detector.update_hr(70.0, 0);
        let mut transitions = Vec::new();

        // Target alternates Positioned / Activity every 500 ms
        for i in 0..40u64 {
            let ir = if i % 2 == 0 { BASELINE } else { ACTIVE_IR };
            run(&mut detector, i * 500, (i + 1) * 500, 20, ir, &mut transitions);
        }

        assert!(transitions.is_empty());
        assert_eq!(detector.current_state(), DataStreaming);
    }

    #[test]
    fn test_held_target_commits_once() {
        let mut detector = StateTransitionDetector::default();
        detector.update_hr(70.0, 0);
        let mut transitions = Vec::new();
        run(&mut detector, 0, 2_002, 1, BASELINE, &mut transitions);

        assert_eq!(
            transitions,
            vec![StateTransition {
                previous: DataStreaming,
                new: Positioned,
                timestamp: 2_000,
            }]
        );
        assert_eq!(detector.transition_count(), 1);
    }

    #[test]
    fn test_single_sample_resets_timer() {
        let mut detector = StateTransitionDetector::default();
        detector.update_hr(70.0, 0);
        detector.restore_baseline(BASELINE).unwrap();
        let mut transitions = Vec::new();
        run(&mut detector, 0, 2_000, 20, BASELINE, &mut transitions);
        assert_eq!(detector.current_state(), Positioned);

        run(&mut detector, 2_000, 2_900, 20, ACTIVE_IR, &mut transitions);
        assert_eq!(detector.pending_target(), Some(Activity));
        run(&mut detector, 2_900, 2_920, 20, BASELINE, &mut transitions);
        assert_eq!(detector.pending_target(), None);
        run(&mut detector, 2_920, 3_820, 20, ACTIVE_IR, &mut transitions);

        assert_eq!(detector.current_state(), Positioned);
        assert_eq!(transitions.len(), 1);
    }

    #[test]
    fn test_skip_edge_uses_summed_debounce() {
        let mut detector = StateTransitionDetector::default();
        detector.restore_baseline(BASELINE).unwrap();
        detector.update_hr(70.0, 0);
        let mut transitions = Vec::new();
        run(&mut detector, 0, 2_980, 20, ACTIVE_IR, &mut transitions);
        assert!(transitions.is_empty());

        run(&mut detector, 2_980, 3_020, 20, ACTIVE_IR, &mut transitions);
        assert_eq!(
            transitions,
            vec![StateTransition {
                previous: DataStreaming,
                new: Activity,
                timestamp: 3_000,
            }]
        );
    }

    #[test]
    fn test_low_hr_does_not_position() {
        let mut detector = StateTransitionDetector::default();
        detector.update_hr(20.0, 0);
        assert!(!detector.is_positioned(1_000));

        detector.update_perfusion_index(0.002, 500);
        assert!(detector.is_positioned(1_000));
    }

    #[test]
    fn test_contact_lost_returns_to_streaming() {
        let mut detector = StateTransitionDetector::default();
        detector.update_hr(70.0, 0);
        let mut transitions = Vec::new();
        run(&mut detector, 0, 3_000, 20, BASELINE, &mut transitions);
        assert_eq!(detector.current_state(), Positioned);

        // HR at t=0 stops counting after 180 s
        run(&mut detector, 3_000, 190_000, 100, BASELINE, &mut transitions);
        assert_eq!(detector.current_state(), DataStreaming);
        let last = transitions.last().unwrap();
        assert_eq!(last.previous, Positioned);
        assert_eq!(last.timestamp, 183_100);
    }

    #[test]
    fn test_calibration_redirects_samples() {
        let mut detector = StateTransitionDetector::default();
        detector.update_hr(70.0, 0);
        detector.start_calibration();

        let mut outputs = Vec::new();
        for i in 0..=750u64 {
            outputs.extend(detector.process_sample(&IrSample::new(BASELINE, i * 20)));
        }

        assert!(outputs
            .iter()
            .all(|o| matches!(o, DetectorOutput::Calibration(_))));
        assert_eq!(detector.current_state(), DataStreaming);
        assert!(detector.calibration().is_calibrated());
    }

    #[test]
    fn test_reset() {
        let mut detector = StateTransitionDetector::default();
        detector.update_hr(70.0, 0);
        detector.restore_baseline(BASELINE).unwrap();
        let mut transitions = Vec::new();
        run(&mut detector, 0, 3_000, 20, BASELINE, &mut transitions);

        detector.reset();
        assert_eq!(detector.current_state(), DataStreaming);
        assert_eq!(detector.transition_count(), 0);
        assert!(detector.calibration().is_calibrated());
        assert!(detector.is_positioned(3_000));

        detector.full_reset();
        assert!(!detector.calibration().is_calibrated());
        assert!(!detector.is_positioned(3_000));
    }
}

//! # Biometric History Module
//!
//! Side-channel metrics reported by the device alongside the optical stream:
//! heart rate, SpO2, perfusion index, sleep state and skin temperature.
//!
//! Each detector owns its own `BiometricHistory`. Histories are bounded to the
//! validation window plus a retention margin and pruned on every insert.
//!
//! ## Positioning
//! The device counts as positioned on skin at time `t` when, within the
//! trailing validation window ending at `t`, at least one of these was
//! recorded: a qualifying HR, an SpO2 reading at or above the minimum, or a
//! perfusion index at or above the minimum.

use crate::config::BiometricsConfig;
use crate::timeseries::TimeSeries;
use serde::{Deserialize, Serialize};

/// Sleep classification reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SleepState {
    Unknown,
    Awake,
    Light,
    Deep,
    Rem,
}

impl SleepState {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => SleepState::Awake,
            2 => SleepState::Light,
            3 => SleepState::Deep,
            4 => SleepState::Rem,
            _ => SleepState::Unknown,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            SleepState::Unknown => 0,
            SleepState::Awake => 1,
            SleepState::Light => 2,
            SleepState::Deep => 3,
            SleepState::Rem => 4,
        }
    }
}

/// Thresholds a metric must meet to prove skin contact
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositioningRule {
    /// HR must be positive and at least this value
    pub min_hr: f64,
    pub min_spo2: f64,
    pub min_perfusion_index: f64,
}

impl PositioningRule {
    /// Event validity: any positive HR counts
    pub fn for_events(config: &BiometricsConfig) -> Self {
        Self {
            min_hr: 0.0,
            min_spo2: config.min_spo2,
            min_perfusion_index: config.min_perfusion_index,
        }
    }

    /// Device state: HR has to be physiologically plausible
    pub fn for_state(config: &BiometricsConfig) -> Self {
        Self {
            min_hr: config.state_min_hr,
            min_spo2: config.min_spo2,
            min_perfusion_index: config.min_perfusion_index,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BiometricHistory {
    hr: TimeSeries,
    spo2: TimeSeries,
    perfusion_index: TimeSeries,
    sleep: TimeSeries,
    temperature: TimeSeries,
    validation_window_ms: u64,
}

impl BiometricHistory {
    pub fn new(config: &BiometricsConfig) -> Self {
        let validation_window_ms = config.validation_window_seconds * 1_000;
        let retention_ms = validation_window_ms + config.retention_margin_seconds * 1_000;
        Self {
            hr: TimeSeries::new(retention_ms),
            spo2: TimeSeries::new(retention_ms),
            perfusion_index: TimeSeries::new(retention_ms),
            sleep: TimeSeries::new(retention_ms),
            temperature: TimeSeries::new(retention_ms),
            validation_window_ms,
        }
    }

    pub fn validation_window_ms(&self) -> u64 {
        self.validation_window_ms
    }

    pub fn update_hr(&mut self, bpm: f64, timestamp: u64) {
        self.hr.add_point(timestamp, bpm);
    }

    pub fn update_spo2(&mut self, percent: f64, timestamp: u64) {
        self.spo2.add_point(timestamp, percent);
    }

    pub fn update_perfusion_index(&mut self, pi: f64, timestamp: u64) {
        self.perfusion_index.add_point(timestamp, pi);
    }

    pub fn update_sleep(&mut self, state: SleepState, timestamp: u64) {
        self.sleep.add_point(timestamp, state.code() as f64);
    }

    pub fn update_temperature(&mut self, celsius: f64, timestamp: u64) {
        self.temperature.add_point(timestamp, celsius);
    }

    pub fn latest_hr_at(&self, t: u64) -> Option<f64> {
        self.hr.latest_at_or_before(t).map(|p| p.value)
    }

    pub fn latest_spo2_at(&self, t: u64) -> Option<f64> {
        self.spo2.latest_at_or_before(t).map(|p| p.value)
    }

    pub fn latest_perfusion_index_at(&self, t: u64) -> Option<f64> {
        self.perfusion_index.latest_at_or_before(t).map(|p| p.value)
    }

    pub fn latest_sleep_at(&self, t: u64) -> Option<SleepState> {
        self.sleep
            .latest_at_or_before(t)
            .map(|p| SleepState::from_code(p.value as u8))
    }

    pub fn latest_temperature_at(&self, t: u64) -> Option<f64> {
        self.temperature.latest_at_or_before(t).map(|p| p.value)
    }

    /// Whether any metric within the validation window proves skin contact
    pub fn is_positioned(&self, t: u64, rule: &PositioningRule) -> bool {
        let window = self.validation_window_ms;
        self.hr
            .any_in_window(t, window, |hr| hr > 0.0 && hr >= rule.min_hr)
            || self
                .spo2
                .any_in_window(t, window, |spo2| spo2 >= rule.min_spo2)
            || self
                .perfusion_index
                .any_in_window(t, window, |pi| pi >= rule.min_perfusion_index)
    }

    /// Points currently held across all metrics
    pub fn len(&self) -> usize {
        self.hr.len()
            + self.spo2.len()
            + self.perfusion_index.len()
            + self.sleep.len()
            + self.temperature.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.hr.clear();
        self.spo2.clear();
        self.perfusion_index.clear();
        self.sleep.clear();
        self.temperature.clear();
    }
}

impl Default for BiometricHistory {
    fn default() -> Self {
        Self::new(&BiometricsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> (PositioningRule, PositioningRule) {
        let config = BiometricsConfig::default();
        (
            PositioningRule::for_events(&config),
            PositioningRule::for_state(&config),
        )
    }

    #[test]
    fn test_not_positioned_without_metrics() {
        let history = BiometricHistory::default();
        let (events, state) = rules();
        assert!(!history.is_positioned(10_000, &events));
        assert!(!history.is_positioned(10_000, &state));
    }

    #[test]
    fn test_low_hr_counts_for_events_only() {
        let mut history = BiometricHistory::default();
        history.update_hr(20.0, 1_000);
        let (events, state) = rules();

        assert!(history.is_positioned(5_000, &events));
        assert!(!history.is_positioned(5_000, &state));
    }

    #[test]
    fn test_zero_hr_never_positions() {
        let mut history = BiometricHistory::default();
        history.update_hr(0.0, 1_000);
        let (events, _) = rules();
        assert!(!history.is_positioned(5_000, &events));
    }

    #[test]
    fn test_spo2_and_pi_thresholds() {
        let (events, _) = rules();

        let mut history = BiometricHistory::default();
        history.update_spo2(65.0, 1_000);
        history.update_perfusion_index(0.0005, 1_000);
        assert!(!history.is_positioned(2_000, &events));

        history.update_spo2(97.0, 1_500);
        assert!(history.is_positioned(2_000, &events));

        let mut history = BiometricHistory::default();
        history.update_perfusion_index(0.002, 1_000);
        assert!(history.is_positioned(2_000, &events));
    }

    #[test]
    fn test_positioning_expires_after_window() {
        let mut history = BiometricHistory::default();
        history.update_hr(70.0, 10_000);
        let (_, state) = rules();

        assert!(history.is_positioned(190_000, &state));
        assert!(!history.is_positioned(190_001, &state));
    }

    #[test]
    fn test_future_metrics_do_not_count() {
        let mut history = BiometricHistory::default();
        history.update_hr(70.0, 10_000);
        let (_, state) = rules();
        assert!(!history.is_positioned(9_999, &state));
    }

    #[test]
    fn test_history_bounded() {
        let mut history = BiometricHistory::default();
        for t in (0..1_000_000).step_by(1_000) {
            history.update_hr(60.0, t);
        }
        // 180 s window + 60 s margin at 1 Hz
        assert!(history.len() <= 241);
    }

    #[test]
    fn test_latest_values() {
        let mut history = BiometricHistory::default();
        history.update_sleep(SleepState::Deep, 1_000);
        history.update_sleep(SleepState::Rem, 3_000);
        history.update_temperature(33.1, 2_000);

        assert_eq!(history.latest_sleep_at(2_000), Some(SleepState::Deep));
        assert_eq!(history.latest_sleep_at(4_000), Some(SleepState::Rem));
        assert_eq!(history.latest_temperature_at(2_500), Some(33.1));
        assert_eq!(history.latest_spo2_at(2_500), None);
    }

    #[test]
    fn test_sleep_codes() {
        for state in [
            SleepState::Unknown,
            SleepState::Awake,
            SleepState::Light,
            SleepState::Deep,
            SleepState::Rem,
        ] {
            assert_eq!(SleepState::from_code(state.code()), state);
        }
        assert_eq!(SleepState::from_code(99), SleepState::Unknown);
    }
}

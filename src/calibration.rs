//! # Baseline Calibration Module
//!
//! Captures the IR baseline from a still period so later samples can be
//! expressed as percent deviation from it.
//!
//! ## Lifecycle
//! ```text
//! NotStarted --start--> Calibrating(progress) --duration elapsed--> Calibrated(baseline)
//!                                                               \-> Failed(reason)
//! any state --reset/cancel--> NotStarted
//! ```
//!
//! Elapsed time is measured on sample timestamps, starting at the first
//! sample seen after `start_calibration`, so replayed recordings calibrate
//! exactly as they did live.

use crate::config::CalibrationConfig;
use crate::error::CalibrationError;
use crate::stats::SliceStatsExt;

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationState {
    NotStarted,
    Calibrating { progress: f64 },
    Calibrated { baseline: f64 },
    Failed(CalibrationError),
}

/// Summary of a successful calibration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationResult {
    pub baseline: f64,
    pub cv: f64,
    pub sample_count: usize,
}

/// Notifications produced while calibrating
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationUpdate {
    Progress(f64),
    Completed(CalibrationResult),
    Failed(CalibrationError),
}

#[derive(Debug, Clone)]
pub struct CalibrationManager {
    config: CalibrationConfig,
    state: CalibrationState,
    samples: Vec<f64>,
    started_at: Option<u64>,
    last_result: Option<CalibrationResult>,
}

impl CalibrationManager {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            state: CalibrationState::NotStarted,
            samples: Vec::new(),
            started_at: None,
            last_result: None,
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn is_calibrating(&self) -> bool {
        matches!(self.state, CalibrationState::Calibrating { .. })
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self.state, CalibrationState::Calibrated { .. })
    }

    pub fn baseline(&self) -> Option<f64> {
        match self.state {
            CalibrationState::Calibrated { baseline } => Some(baseline),
            _ => None,
        }
    }

    pub fn last_result(&self) -> Option<&CalibrationResult> {
        self.last_result.as_ref()
    }

    /// Number of accepted samples in the current attempt
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Begin a new still period, discarding any previous attempt or baseline
    pub fn start_calibration(&mut self) {
        log::info!(
            "Calibration started ({} ms, >= {} samples)",
            self.config.duration_ms,
            self.config.minimum_samples
        );
        self.samples.clear();
        self.started_at = None;
        self.state = CalibrationState::Calibrating { progress: 0.0 };
    }

    pub fn cancel_calibration(&mut self) {
        if self.is_calibrating() {
            log::info!("Calibration cancelled after {} samples", self.samples.len());
        }
        self.reset();
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.started_at = None;
        self.last_result = None;
        self.state = CalibrationState::NotStarted;
    }

    /// Use a baseline captured earlier instead of running a still period
    pub fn restore_baseline(&mut self, baseline: f64) -> Result<(), CalibrationError> {
        if !self.in_valid_range(baseline) {
            return Err(CalibrationError::InvalidBaseline { baseline });
        }
        log::info!("Restored calibration baseline {:.0}", baseline);
        self.samples.clear();
        self.started_at = None;
        self.state = CalibrationState::Calibrated { baseline };
        Ok(())
    }

    fn in_valid_range(&self, ir: f64) -> bool {
        ir >= self.config.min_valid_ir && ir <= self.config.max_valid_ir
    }

    /// Feed one IR reading into an active calibration
    ///
    /// Out-of-range readings are skipped without counting. Returns progress for
    /// accepted samples and the outcome once the duration has elapsed.
    pub fn add_sample(&mut self, ir: f64, timestamp: u64) -> Option<CalibrationUpdate> {
        if !self.is_calibrating() {
            return None;
        }

        let started = *self.started_at.get_or_insert(timestamp);
        let elapsed = timestamp.saturating_sub(started);

        let accepted = self.in_valid_range(ir);
        if accepted {
            self.samples.push(ir);
        }

        if elapsed >= self.config.duration_ms {
            return Some(self.finish());
        }

        if !accepted {
            log::trace!("Calibration skipped out-of-range sample {}", ir);
            return None;
        }

        let progress = (elapsed as f64 / self.config.duration_ms as f64).min(1.0);
        self.state = CalibrationState::Calibrating { progress };
        Some(CalibrationUpdate::Progress(progress))
    }

    fn finish(&mut self) -> CalibrationUpdate {
        let outcome = self.evaluate();
        self.samples.clear();
        self.started_at = None;

        match outcome {
            Ok(result) => {
                log::info!(
                    "Calibration complete: baseline {:.0}, CV {:.3}, {} samples",
                    result.baseline,
                    result.cv,
                    result.sample_count
                );
                self.state = CalibrationState::Calibrated {
                    baseline: result.baseline,
                };
                self.last_result = Some(result);
                CalibrationUpdate::Completed(result)
            }
            Err(err) => {
                log::warn!("{}", err);
                self.state = CalibrationState::Failed(err.clone());
                CalibrationUpdate::Failed(err)
            }
        }
    }

    fn evaluate(&self) -> Result<CalibrationResult, CalibrationError> {
        let count = self.samples.len();
        if count < self.config.minimum_samples {
            return Err(CalibrationError::InsufficientSamples {
                collected: count,
                required: self.config.minimum_samples,
            });
        }

        let samples = self.samples.as_slice();
        let (Some(baseline), Some(cv)) = (samples.median(), samples.coefficient_of_variation())
        else {
            return Err(CalibrationError::InsufficientSamples {
                collected: count,
                required: self.config.minimum_samples.max(1),
            });
        };

        if cv > self.config.max_cv {
            return Err(CalibrationError::Unstable { cv });
        }
        if !self.in_valid_range(baseline) {
            return Err(CalibrationError::InvalidBaseline { baseline });
        }

        Ok(CalibrationResult {
            baseline,
            cv,
            sample_count: count,
        })
    }

    /// Percent deviation from the baseline; defined only when calibrated
    pub fn normalize(&self, ir: f64) -> Option<f64> {
        self.baseline()
            .map(|baseline| (ir - baseline) / baseline * 100.0)
    }

    /// Absolute IR value corresponding to a percent threshold
    pub fn threshold_to_absolute(&self, percent: f64) -> Option<f64> {
        self.baseline().map(|baseline| baseline * (1.0 + percent / 100.0))
    }
}

impl Default for CalibrationManager {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `count` samples evenly spaced over `duration_ms`, returning the last update
    fn run(
        manager: &mut CalibrationManager,
        count: usize,
        duration_ms: u64,
        value: impl Fn(usize) -> f64,
    ) -> Option<CalibrationUpdate> {
        let mut last = None;
        for i in 0..count {
            let t = 1_000_000 + (i as u64 * duration_ms) / (count as u64 - 1);
            if let Some(update) = manager.add_sample(value(i), t) {
                last = Some(update);
            }
        }
        last
    }

    #[test]
    fn test_calibration_success() {
        let mut manager = CalibrationManager::default();
        manager.start_calibration();

        // Deterministic spread over [99500, 100500]
        let update = run(&mut manager, 520, 15_000, |i| 99_500.0 + ((i * 379) % 1_001) as f64);

        match update {
            Some(CalibrationUpdate::Completed(result)) => {
                assert!((result.baseline - 100_000.0).abs() < 50.0, "{}", result.baseline);
                assert!(result.cv < 0.01);
                assert_eq!(result.sample_count, 520);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(manager.is_calibrated());
        assert!(manager.baseline().is_some());
    }

    #[test]
    fn test_calibration_unstable() {
        let mut manager = CalibrationManager::default();
        manager.start_calibration();

        let update = run(&mut manager, 520, 15_000, |i| {
            if i % 50 == 0 {
                4_990_000.0
            } else {
                10_000.0
            }
        });

        match update {
            Some(CalibrationUpdate::Failed(err)) => {
                assert_eq!(err.reason(), "signal unstable");
                assert!(matches!(err, CalibrationError::Unstable { cv } if cv > 1.5));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(manager.state(), CalibrationState::Failed(_)));
        assert!(manager.normalize(100_000.0).is_none());
    }

    #[test]
    fn test_alternating_signal_passes_default_cv() {
        let mut manager = CalibrationManager::default();
        manager.start_calibration();

        let update = run(&mut manager, 520, 15_000, |i| {
            if i % 2 == 0 {
                50_000.0
            } else {
                150_000.0
            }
        });

        assert!(matches!(update, Some(CalibrationUpdate::Completed(_))));
        assert_eq!(manager.baseline(), Some(100_000.0));
    }

    #[test]
    fn test_calibration_insufficient_samples() {
        let mut manager = CalibrationManager::default();
        manager.start_calibration();

        let update = run(&mut manager, 100, 15_000, |_| 100_000.0);

        assert!(matches!(
            update,
            Some(CalibrationUpdate::Failed(CalibrationError::InsufficientSamples {
                collected: 100,
                required: 500
            }))
        ));
    }

    #[test]
    fn test_out_of_range_samples_skipped() {
        let mut manager = CalibrationManager::default();
        manager.start_calibration();

        assert_eq!(manager.add_sample(5_000.0, 0), None);
        assert_eq!(manager.add_sample(9_000_000.0, 100), None);
        assert_eq!(manager.sample_count(), 0);

        match manager.add_sample(100_000.0, 7_500) {
            Some(CalibrationUpdate::Progress(p)) => assert!((p - 0.5).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(manager.sample_count(), 1);
    }

    #[test]
    fn test_restore_baseline_validation() {
        let mut manager = CalibrationManager::default();
        assert!(matches!(
            manager.restore_baseline(1_000.0),
            Err(CalibrationError::InvalidBaseline { .. })
        ));
        assert!(!manager.is_calibrated());

        assert!(manager.restore_baseline(80_000.0).is_ok());
        assert_eq!(manager.baseline(), Some(80_000.0));
    }

    #[test]
    fn test_normalize_and_threshold() {
        let mut manager = CalibrationManager::default();
        assert!(manager.normalize(140_000.0).is_none());
        assert!(manager.threshold_to_absolute(40.0).is_none());

        manager.restore_baseline(100_000.0).unwrap();
        assert!((manager.normalize(140_000.0).unwrap() - 40.0).abs() < 1e-9);
        assert!((manager.normalize(90_000.0).unwrap() + 10.0).abs() < 1e-9);
        assert!((manager.threshold_to_absolute(40.0).unwrap() - 140_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_and_reset_return_to_not_started() {
        let mut manager = CalibrationManager::default();
        manager.start_calibration();
        manager.add_sample(100_000.0, 0);
        manager.cancel_calibration();
        assert_eq!(manager.state(), &CalibrationState::NotStarted);
        assert_eq!(manager.add_sample(100_000.0, 10), None);

        manager.restore_baseline(100_000.0).unwrap();
        manager.reset();
        assert_eq!(manager.state(), &CalibrationState::NotStarted);
    }

    #[test]
    fn test_progress_clamped() {
        let mut manager = CalibrationManager::default();
        manager.start_calibration();
        manager.add_sample(100_000.0, 0);
        match manager.add_sample(100_000.0, 14_999) {
            Some(CalibrationUpdate::Progress(p)) => assert!(p <= 1.0 && p > 0.99),
            other => panic!("unexpected {:?}", other),
        }
    }
}

//! # IR-DC Baseline Processor
//!
//! Tracks the slow (DC) component of the infrared channel and how far it has
//! moved over the last few seconds. Muscle contraction and occlusion push
//! blood out of the optical path, which shows up as a drop in IR DC.
//!
//! ## Signals
//! - DC trace: every raw sample streamed through a low-pass (0.8 Hz, order 4)
//! - Rolling mean: mean of the DC trace over the last `rolling_window_seconds`
//! - Shift: mean of the first `reference_window_seconds` of that rolling
//!   window minus the full rolling mean. Positive shift means the baseline
//!   dropped.
//!
//! A calibration baseline can be set independently from the median of recent
//! raw samples, enabling normalized percentages.

use crate::config::IrDcConfig;
use crate::error::{CalibrationError, FilterError};
use crate::filter::{ButterworthFilter, FilterKind};
use crate::stats::SliceStatsExt;
use std::collections::VecDeque;

/// Seconds of constant input used to seed the DC filter on the first sample
const DC_SEED_SECONDS: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct IrDcProcessor {
    config: IrDcConfig,
    raw: VecDeque<f64>,
    dc: VecDeque<f64>,
    capacity: usize,
    lowpass: ButterworthFilter,
    baseline: Option<f64>,
}

impl IrDcProcessor {
    pub fn new(config: IrDcConfig) -> Result<Self, FilterError> {
        let lowpass = ButterworthFilter::with_design(
            FilterKind::Lowpass {
                cutoff_hz: config.dc_cutoff_hz,
            },
            config.dc_filter_order,
            config.sample_rate_hz,
            config.filter_design,
        )?;
        let capacity = seconds_to_samples(config.buffer_seconds, config.sample_rate_hz);
        Ok(Self {
            raw: VecDeque::with_capacity(capacity),
            dc: VecDeque::with_capacity(capacity),
            capacity,
            lowpass,
            baseline: None,
            config,
        })
    }

    pub fn config(&self) -> &IrDcConfig {
        &self.config
    }

    fn samples(&self, seconds: f64) -> usize {
        seconds_to_samples(seconds, self.config.sample_rate_hz)
    }

    /// Add one raw IR reading; returns the current DC value
    pub fn process_sample(&mut self, ir: f64) -> f64 {
        if self.dc.is_empty() {
            // Start the DC trace at signal level instead of ramping up from zero
            for _ in 0..self.samples(DC_SEED_SECONDS) {
                self.lowpass.process_sample(ir);
            }
        }
        let dc = self.lowpass.process_sample(ir);

        if self.raw.len() == self.capacity {
            self.raw.pop_front();
            self.dc.pop_front();
        }
        self.raw.push_back(ir);
        self.dc.push_back(dc);
        dc
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn current_raw(&self) -> Option<f64> {
        self.raw.back().copied()
    }

    pub fn current_dc(&self) -> Option<f64> {
        self.dc.back().copied()
    }

    /// DC values of the rolling window, or `None` until it has filled
    fn rolling_window(&self) -> Option<Vec<f64>> {
        let n = self.samples(self.config.rolling_window_seconds);
        if self.dc.len() < n {
            return None;
        }
        Some(self.dc.iter().skip(self.dc.len() - n).copied().collect())
    }

    pub fn rolling_mean(&self) -> Option<f64> {
        self.rolling_window()?.as_slice().mean()
    }

    /// Reference mean minus rolling mean; positive when the baseline dropped
    pub fn baseline_shift(&self) -> Option<f64> {
        let window = self.rolling_window()?;
        let reference_len = self
            .samples(self.config.reference_window_seconds)
            .min(window.len());
        let reference = window[..reference_len].mean()?;
        Some(reference - window.as_slice().mean()?)
    }

    pub fn has_significant_shift(&self, threshold: f64) -> bool {
        self.baseline_shift().is_some_and(|shift| shift >= threshold)
    }

    /// Uses the configured default threshold (1000 ADC units)
    pub fn has_default_significant_shift(&self) -> bool {
        self.has_significant_shift(self.config.shift_threshold)
    }

    /// Take the median of the recent raw window as the normalization baseline
    pub fn calibrate_from_recent(&mut self) -> Result<f64, CalibrationError> {
        let n = self.samples(self.config.baseline_window_seconds);
        let required = self.samples(1.0);
        let recent: Vec<f64> = self
            .raw
            .iter()
            .skip(self.raw.len().saturating_sub(n))
            .copied()
            .collect();
        if recent.len() < required {
            return Err(CalibrationError::InsufficientSamples {
                collected: recent.len(),
                required,
            });
        }

        let recent = recent.as_slice();
        let median = recent.median().unwrap_or(0.0);
        if median <= 0.0 {
            return Err(CalibrationError::InvalidBaseline { baseline: median });
        }
        let cv = recent.coefficient_of_variation().unwrap_or(f64::INFINITY);
        if cv > self.config.max_cv {
            return Err(CalibrationError::Unstable { cv });
        }

        log::debug!("IR-DC baseline set to {:.0} (CV {:.4})", median, cv);
        self.baseline = Some(median);
        Ok(median)
    }

    /// Adopt a baseline computed elsewhere, e.g. by the calibration manager
    pub fn set_baseline(&mut self, baseline: f64) -> Result<(), CalibrationError> {
        if !(baseline > 0.0) {
            return Err(CalibrationError::InvalidBaseline { baseline });
        }
        self.baseline = Some(baseline);
        Ok(())
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    pub fn clear_baseline(&mut self) {
        self.baseline = None;
    }

    pub fn normalized_percent(&self, value: f64) -> Option<f64> {
        self.baseline.map(|b| (value - b) / b * 100.0)
    }

    pub fn current_normalized_percent(&self) -> Option<f64> {
        self.normalized_percent(self.current_raw()?)
    }

    /// `None` when no baseline is set
    pub fn is_above_activity_threshold(&self, threshold_percent: f64) -> Option<bool> {
        self.current_normalized_percent()
            .map(|pct| pct > threshold_percent)
    }

    pub fn is_above_default_activity_threshold(&self) -> Option<bool> {
        self.is_above_activity_threshold(self.config.activity_threshold_percent)
    }

    /// Clear buffers and filter state; the baseline is kept
    pub fn reset(&mut self) {
        self.raw.clear();
        self.dc.clear();
        self.lowpass.reset();
    }
}

fn seconds_to_samples(seconds: f64, sample_rate: f64) -> usize {
    ((seconds * sample_rate).round() as usize).max(1)
}

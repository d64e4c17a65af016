//! # Heart-Rate Estimation Module
//!
//! Two interchangeable peak-detection estimators over a rolling PPG window.
//!
//! ## Strategies
//! - `StreamingHeartRate`: single-pole high-pass then low-pass smoothing on
//!   every sample, adaptive `mean + k * stddev` threshold, 3-point maxima.
//!   Cheap, no quality score.
//! - `BatchHeartRate`: zero-phase 0.5-8 Hz bandpass over the whole window,
//!   5-point maxima with a prominence test and minimum peak spacing. Reports a
//!   quality score in `[0, 1]`.
//!
//! A flat or missing signal is "no result", never an error.

use crate::config::HeartRateConfig;
use crate::error::FilterError;
use crate::filter::{ButterworthFilter, FilterKind};
use crate::stats::SliceStatsExt;
use std::collections::VecDeque;

/// One heart-rate reading derived from the optical window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartRateEstimate {
    pub bpm: Option<f64>,
    /// Signal quality in `[0, 1]`; only the batch estimator scores quality
    pub quality: Option<f64>,
    pub peak_count: usize,
    /// Timestamp of the newest sample in the window
    pub timestamp: u64,
    pub reliable: bool,
}

/// Common interface of the heart-rate strategies
pub trait HeartRateEstimator: Send {
    fn add_sample(&mut self, value: f64, timestamp: u64);

    /// Estimate over the current window; `None` while the window is short or flat
    fn estimate(&mut self) -> Option<HeartRateEstimate>;

    fn reset(&mut self);

    fn name(&self) -> &'static str;
}

/// Build the estimator selected in the configuration
pub fn build_estimator(config: &HeartRateConfig) -> Result<Box<dyn HeartRateEstimator>, FilterError> {
    use crate::config::HeartRateStrategy;
    Ok(match config.strategy {
        HeartRateStrategy::Streaming => Box::new(StreamingHeartRate::new(config.clone())),
        HeartRateStrategy::Batch => Box::new(BatchHeartRate::new(config.clone())?),
    })
}

/// Rolling window of timestamped values trimmed to a maximum span
#[derive(Debug, Clone)]
struct Window {
    samples: VecDeque<(u64, f64)>,
    max_span_ms: u64,
}

impl Window {
    fn new(max_seconds: f64, sample_rate: f64) -> Self {
        let capacity = (max_seconds * sample_rate).ceil() as usize + 1;
        Self {
            samples: VecDeque::with_capacity(capacity),
            max_span_ms: (max_seconds * 1_000.0) as u64,
        }
    }

    fn push(&mut self, timestamp: u64, value: f64) {
        self.samples.push_back((timestamp, value));
        while let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) {
            if last.0.saturating_sub(first.0) > self.max_span_ms {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.1).collect()
    }

    /// Seconds between consecutive peaks; pairs whose timestamps run backwards are skipped
    fn intervals_seconds<'a>(&'a self, peaks: &'a [usize]) -> impl Iterator<Item = f64> + 'a {
        peaks.windows(2).filter_map(move |pair| {
            let (earlier, later) = (self.samples.get(pair[0])?.0, self.samples.get(pair[1])?.0);
            later.checked_sub(earlier).map(|ms| ms as f64 / 1_000.0)
        })
    }

    fn newest_timestamp(&self) -> u64 {
        self.samples.back().map_or(0, |s| s.0)
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

fn min_window_len(config: &HeartRateConfig) -> usize {
    (config.min_window_seconds * config.sample_rate_hz).round() as usize
}

/// Inter-beat interval bounds in seconds for the configured BPM range
fn interval_bounds(config: &HeartRateConfig) -> (f64, f64) {
    (60.0 / config.max_bpm, 60.0 / config.min_bpm)
}

#[derive(Debug, Clone)]
pub struct StreamingHeartRate {
    config: HeartRateConfig,
    window: Window,
    dc: Option<f64>,
    smoothed: f64,
}

impl StreamingHeartRate {
    pub fn new(config: HeartRateConfig) -> Self {
        Self {
            window: Window::new(config.max_window_seconds, config.sample_rate_hz),
            config,
            dc: None,
            smoothed: 0.0,
        }
    }
}

impl HeartRateEstimator for StreamingHeartRate {
    fn add_sample(&mut self, value: f64, timestamp: u64) {
        let dc = self.dc.get_or_insert(value);
        *dc += self.config.hp_alpha * (value - *dc);
        let high_passed = value - *dc;
        self.smoothed += self.config.lp_alpha * (high_passed - self.smoothed);
        self.window.push(timestamp, self.smoothed);
    }

    fn estimate(&mut self) -> Option<HeartRateEstimate> {
        if self.window.len() < min_window_len(&self.config).max(3) {
            return None;
        }

        let values = self.window.values();
        let mean = values.as_slice().mean()?;
        let std = values.as_slice().std_dev()?;
        if std < self.config.flat_stddev {
            log::trace!("Streaming HR: flat signal (std {:.3})", std);
            return None;
        }

        let threshold = mean + self.config.threshold_factor * std;
        let peaks: Vec<usize> = (1..values.len() - 1)
            .filter(|&i| values[i] > threshold && values[i] > values[i - 1] && values[i] >= values[i + 1])
            .collect();

        let (min_gap, max_gap) = interval_bounds(&self.config);
        let gaps: Vec<f64> = self
            .window
            .intervals_seconds(&peaks)
            .filter(|gap| (min_gap..=max_gap).contains(gap))
            .collect();

        let bpm = 60.0 / gaps.as_slice().median()?;
        if bpm < self.config.min_bpm || bpm > self.config.max_bpm {
            return None;
        }

        Some(HeartRateEstimate {
            bpm: Some(bpm),
            quality: None,
            peak_count: peaks.len(),
            timestamp: self.window.newest_timestamp(),
            reliable: true,
        })
    }

    fn reset(&mut self) {
        self.window.clear();
        self.dc = None;
        self.smoothed = 0.0;
    }

    fn name(&self) -> &'static str {
        "streaming"
    }
}

#[derive(Debug, Clone)]
pub struct BatchHeartRate {
    config: HeartRateConfig,
    window: Window,
    bandpass: ButterworthFilter,
}

impl BatchHeartRate {
    pub fn new(config: HeartRateConfig) -> Result<Self, FilterError> {
        let bandpass = ButterworthFilter::new(
            FilterKind::Bandpass {
                low_hz: config.band_low_hz,
                high_hz: config.band_high_hz,
            },
            config.band_order,
            config.sample_rate_hz,
        )?;
        Ok(Self {
            window: Window::new(config.max_window_seconds, config.sample_rate_hz),
            config,
            bandpass,
        })
    }

    /// Indices of prominent, well-separated local maxima
    fn find_peaks(&self, values: &[f64], std: f64) -> Vec<usize> {
        let n = values.len();
        let min_distance =
            ((self.config.min_peak_distance_seconds * self.config.sample_rate_hz).round() as usize).max(1);
        let min_prominence = self.config.prominence_factor * std;

        let mut peaks: Vec<usize> = Vec::new();
        for i in 2..n.saturating_sub(2) {
            let v = values[i];
            let is_local_max =
                v > values[i - 1] && v > values[i - 2] && v >= values[i + 1] && v >= values[i + 2];
            if !is_local_max {
                continue;
            }

            let left = min_distance.min(i);
            let right = min_distance.min(n - 1 - i);
            let left_min = values[i - left..i].iter().cloned().fold(f64::INFINITY, f64::min);
            let right_min = values[i + 1..=i + right]
                .iter()
                .cloned()
                .fold(f64::INFINITY, f64::min);
            if v - left_min.max(right_min) < min_prominence {
                continue;
            }

            match peaks.last_mut() {
                Some(last) if i - *last < min_distance => {
                    if v > values[*last] {
                        *last = i;
                    }
                }
                _ => peaks.push(i),
            }
        }
        peaks
    }
}

impl HeartRateEstimator for BatchHeartRate {
    fn add_sample(&mut self, value: f64, timestamp: u64) {
        self.window.push(timestamp, value);
    }

    fn estimate(&mut self) -> Option<HeartRateEstimate> {
        if self.window.len() < min_window_len(&self.config).max(5) {
            return None;
        }

        let raw = self.window.values();
        let offset = raw.as_slice().mean()?;
        let centered: Vec<f64> = raw.iter().map(|v| v - offset).collect();
        let filtered = self.bandpass.filtfilt(&centered);

        let mean = filtered.as_slice().mean()?;
        let std = filtered.as_slice().std_dev()?;
        if std < self.config.flat_stddev {
            log::trace!("Batch HR: flat signal (std {:.3})", std);
            return None;
        }

        let peaks = self.find_peaks(&filtered, std);
        let (min_rr, max_rr) = interval_bounds(&self.config);
        let intervals: Vec<f64> = self
            .window
            .intervals_seconds(&peaks)
            .filter(|rr| (min_rr..=max_rr).contains(rr))
            .collect();

        let bpm = intervals
            .as_slice()
            .median()
            .map(|rr| 60.0 / rr)
            .filter(|bpm| (self.config.min_bpm..=self.config.max_bpm).contains(bpm));

        let amplitude_score = if mean.abs() < 1e-9 {
            1.0
        } else {
            (std / mean.abs()).min(1.0)
        };
        let peak_score = (peaks.len() as f64 / 10.0).min(1.0);
        let regularity_score = intervals
            .as_slice()
            .coefficient_of_variation()
            .map_or(0.0, |cv| (1.0 - 2.0 * cv).max(0.0));
        let quality = 0.3 * amplitude_score + 0.3 * peak_score + 0.4 * regularity_score;

        Some(HeartRateEstimate {
            bpm,
            quality: Some(quality),
            peak_count: peaks.len(),
            timestamp: self.window.newest_timestamp(),
            reliable: bpm.is_some() && quality > self.config.reliable_quality,
        })
    }

    fn reset(&mut self) {
        self.window.clear();
        self.bandpass.reset();
    }

    fn name(&self) -> &'static str {
        "batch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn feed_pulse(estimator: &mut dyn HeartRateEstimator, bpm: f64, seconds: f64, amplitude: f64) {
        let fs = 50.0;
        let n = (seconds * fs) as usize;
        for i in 0..n {
            let t = i as f64 / fs;
            let value = 100_000.0 + amplitude * (2.0 * PI * bpm / 60.0 * t).sin();
            estimator.add_sample(value, 1_000_000 + i as u64 * 20);
        }
    }

    #[test]
    fn test_streaming_detects_rate() {
        let mut hr = StreamingHeartRate::new(HeartRateConfig::default());
        feed_pulse(&mut hr, 72.0, 8.0, 500.0);

        let estimate = hr.estimate().expect("estimate");
        let bpm = estimate.bpm.unwrap();
        assert!((bpm - 72.0).abs() < 3.0, "bpm {}", bpm);
        assert!(estimate.quality.is_none());
    }

    #[test]
    fn test_streaming_needs_full_window() {
        let mut hr = StreamingHeartRate::new(HeartRateConfig::default());
        feed_pulse(&mut hr, 72.0, 2.0, 500.0);
        assert!(hr.estimate().is_none());
    }

    #[test]
    fn test_streaming_flat_signal() {
        let mut hr = StreamingHeartRate::new(HeartRateConfig::default());
        feed_pulse(&mut hr, 72.0, 8.0, 0.0);
        assert!(hr.estimate().is_none());
    }

    #[test]
    fn test_batch_detects_rate_with_quality() {
        let mut hr = BatchHeartRate::new(HeartRateConfig::default()).unwrap();
        feed_pulse(&mut hr, 72.0, 10.0, 500.0);

        let estimate = hr.estimate().expect("estimate");
        let bpm = estimate.bpm.unwrap();
        assert!((bpm - 72.0).abs() < 3.0, "bpm {}", bpm);
        assert!(estimate.quality.unwrap() > 0.5);
        assert!(estimate.reliable);
        assert!(estimate.peak_count >= 10);
    }

    #[test]
    fn test_batch_fast_rate() {
        let mut hr = BatchHeartRate::new(HeartRateConfig::default()).unwrap();
        feed_pulse(&mut hr, 120.0, 10.0, 300.0);

        let bpm = hr.estimate().and_then(|e| e.bpm).unwrap();
        assert!((bpm - 120.0).abs() < 5.0, "bpm {}", bpm);
    }

    #[test]
    fn test_batch_flat_signal() {
        let mut hr = BatchHeartRate::new(HeartRateConfig::default()).unwrap();
        feed_pulse(&mut hr, 72.0, 10.0, 0.0);
        assert!(hr.estimate().is_none());
    }

    #[test]
    fn test_window_trimmed_to_max_span() {
        let mut hr = BatchHeartRate::new(HeartRateConfig::default()).unwrap();
        feed_pulse(&mut hr, 72.0, 30.0, 500.0);
        assert!(hr.window.len() <= 501);
    }

    #[test]
    fn test_reset_clears_window() {
        let mut hr = StreamingHeartRate::new(HeartRateConfig::default());
        feed_pulse(&mut hr, 72.0, 8.0, 500.0);
        hr.reset();
        assert!(hr.estimate().is_none());
    }

    #[test]
    fn test_streaming_rejects_rate_above_range() {
        let mut hr = StreamingHeartRate::new(HeartRateConfig::default());
        feed_pulse(&mut hr, 200.0, 8.0, 500.0);
        assert!(hr.estimate().is_none());
    }

    #[test]
    fn test_streaming_rejects_rate_below_range() {
        let mut hr = StreamingHeartRate::new(HeartRateConfig::default());
        feed_pulse(&mut hr, 30.0, 10.0, 500.0);
        assert!(hr.estimate().is_none());
    }

    #[test]
    fn test_clock_stepping_back_does_not_panic() {
        let estimators: Vec<Box<dyn HeartRateEstimator>> = vec![
            Box::new(StreamingHeartRate::new(HeartRateConfig::default())),
            Box::new(BatchHeartRate::new(HeartRateConfig::default()).unwrap()),
        ];
        for mut hr in estimators {
            feed_pulse(hr.as_mut(), 72.0, 4.0, 500.0);
            // device clock resynced 1.5 s into the past
            let resumed = 1_000_000 + 200 * 20 - 1_500;
            for i in 0..200u64 {
                let t = (200 + i) as f64 / 50.0;
                let value = 100_000.0 + 500.0 * (2.0 * PI * 72.0 / 60.0 * t).sin();
                hr.add_sample(value, resumed + i * 20);
            }

            if let Some(bpm) = hr.estimate().and_then(|e| e.bpm) {
                assert!((40.0..=180.0).contains(&bpm), "{}: bpm {}", hr.name(), bpm);
            }
        }
    }

    #[test]
    fn test_build_estimator_follows_strategy() {
        let mut config = HeartRateConfig::default();
        assert_eq!(build_estimator(&config).unwrap().name(), "batch");
        config.strategy = crate::config::HeartRateStrategy::Streaming;
        assert_eq!(build_estimator(&config).unwrap().name(), "streaming");
    }
}

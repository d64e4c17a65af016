//! # Butterworth Filter Module
//!
//! Second-order IIR sections designed with the bilinear transform and
//! frequency prewarping, run as a cascade in Direct Form II Transposed.
//!
//! ## Designs
//! - `FilterDesign::LegacyRepeated`: one 2nd-order section (Q = 1/sqrt(2)) repeated
//!   `order / 2` times. This is not a true higher-order Butterworth response but
//!   existing thresholds were tuned against it, so it stays the default.
//! - `FilterDesign::Butterworth`: poles distributed on the Butterworth circle,
//!   with a first-order section for odd orders.
//!
//! ## Modes
//! - Streaming: `process_sample`, O(1) per sample
//! - Zero-phase batch: `filtfilt`, forward and reverse passes over a buffer.
//!   The streaming state is saved and restored around the call.
//!
//! A filter instance is mutable and belongs to exactly one stream.

use crate::error::FilterError;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// A single biquad (second-order section).
///
/// H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone, PartialEq)]
pub struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
    state: [f64; 2],
}

impl Biquad {
    pub fn new(b: [f64; 3], a: [f64; 2]) -> Self {
        Self {
            b,
            a,
            state: [0.0; 2],
        }
    }

    /// Prewarped analog frequency for a digital cutoff
    fn prewarp(cutoff_hz: f64, sample_rate: f64) -> f64 {
        (PI * cutoff_hz / sample_rate).tan()
    }

    fn lowpass(k: f64, q: f64) -> Self {
        let norm = 1.0 / (1.0 + k / q + k * k);
        let b0 = k * k * norm;
        Self::new(
            [b0, 2.0 * b0, b0],
            [2.0 * (k * k - 1.0) * norm, (1.0 - k / q + k * k) * norm],
        )
    }

    fn highpass(k: f64, q: f64) -> Self {
        let norm = 1.0 / (1.0 + k / q + k * k);
        Self::new(
            [norm, -2.0 * norm, norm],
            [2.0 * (k * k - 1.0) * norm, (1.0 - k / q + k * k) * norm],
        )
    }

    /// Constant 0 dB peak gain bandpass around `k`
    fn bandpass(k: f64, q: f64) -> Self {
        let norm = 1.0 / (1.0 + k / q + k * k);
        let b0 = k / q * norm;
        Self::new(
            [b0, 0.0, -b0],
            [2.0 * (k * k - 1.0) * norm, (1.0 - k / q + k * k) * norm],
        )
    }

    fn first_order_lowpass(k: f64) -> Self {
        let b0 = k / (1.0 + k);
        Self::new([b0, b0, 0.0], [(k - 1.0) / (k + 1.0), 0.0])
    }

    fn first_order_highpass(k: f64) -> Self {
        let b0 = 1.0 / (1.0 + k);
        Self::new([b0, -b0, 0.0], [(k - 1.0) / (k + 1.0), 0.0])
    }

    /// Process a single sample using Direct Form II Transposed.
    pub fn process(&mut self, input: f64) -> f64 {
        let output = self.b[0] * input + self.state[0];
        self.state[0] = self.b[1] * input - self.a[0] * output + self.state[1];
        self.state[1] = self.b[2] * input - self.a[1] * output;
        output
    }

    pub fn reset(&mut self) {
        self.state = [0.0; 2];
    }

    pub fn numerator(&self) -> &[f64; 3] {
        &self.b
    }

    pub fn denominator(&self) -> &[f64; 2] {
        &self.a
    }

    /// Poles inside the unit circle
    pub fn is_stable(&self) -> bool {
        self.a[1].abs() < 1.0 && self.a[0].abs() < 1.0 + self.a[1]
    }
}

/// Response shape with its corner frequencies in Hz
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterKind {
    Lowpass { cutoff_hz: f64 },
    Highpass { cutoff_hz: f64 },
    Bandpass { low_hz: f64, high_hz: f64 },
}

/// How sections are synthesized for orders above 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterDesign {
    #[default]
    LegacyRepeated,
    Butterworth,
}

impl FilterDesign {
    /// Build the biquad cascade for a validated kind/order/rate
    fn sections(self, kind: FilterKind, order: usize, sample_rate: f64) -> Vec<Biquad> {
        match self {
            FilterDesign::LegacyRepeated => {
                let section = match kind {
                    FilterKind::Lowpass { cutoff_hz } => {
                        Biquad::lowpass(Biquad::prewarp(cutoff_hz, sample_rate), FRAC_1_SQRT_2)
                    }
                    FilterKind::Highpass { cutoff_hz } => {
                        Biquad::highpass(Biquad::prewarp(cutoff_hz, sample_rate), FRAC_1_SQRT_2)
                    }
                    FilterKind::Bandpass { low_hz, high_hz } => {
                        let wc_low = Biquad::prewarp(low_hz, sample_rate);
                        let wc_high = Biquad::prewarp(high_hz, sample_rate);
                        let w0 = (wc_low * wc_high).sqrt();
                        let bw = wc_high - wc_low;
                        Biquad::bandpass(w0, w0 / bw)
                    }
                };
                vec![section; (order / 2).max(1)]
            }
            FilterDesign::Butterworth => match kind {
                FilterKind::Lowpass { cutoff_hz } => {
                    butterworth_sections(order, Biquad::prewarp(cutoff_hz, sample_rate), false)
                }
                FilterKind::Highpass { cutoff_hz } => {
                    butterworth_sections(order, Biquad::prewarp(cutoff_hz, sample_rate), true)
                }
                FilterKind::Bandpass { low_hz, high_hz } => {
                    let mut sections =
                        butterworth_sections(order, Biquad::prewarp(low_hz, sample_rate), true);
                    sections.extend(butterworth_sections(
                        order,
                        Biquad::prewarp(high_hz, sample_rate),
                        false,
                    ));
                    sections
                }
            },
        }
    }
}

/// Pole-pair sections of an order-n Butterworth prototype
fn butterworth_sections(order: usize, k: f64, highpass: bool) -> Vec<Biquad> {
    let order = order.max(1);
    let mut sections = Vec::with_capacity(order / 2 + 1);
    for i in 0..order / 2 {
        let theta = PI * (2 * i + 1) as f64 / (2 * order) as f64;
        let q = 1.0 / (2.0 * theta.cos());
        sections.push(if highpass {
            Biquad::highpass(k, q)
        } else {
            Biquad::lowpass(k, q)
        });
    }
    if order % 2 == 1 {
        sections.push(if highpass {
            Biquad::first_order_highpass(k)
        } else {
            Biquad::first_order_lowpass(k)
        });
    }
    sections
}

/// Saved streaming state of every section
#[derive(Debug, Clone, PartialEq)]
pub struct FilterState(Vec<[f64; 2]>);

/// Butterworth-family IIR filter as a cascade of biquads
#[derive(Debug, Clone)]
pub struct ButterworthFilter {
    kind: FilterKind,
    order: usize,
    sample_rate: f64,
    design: FilterDesign,
    sections: Vec<Biquad>,
}

impl ButterworthFilter {
    pub fn new(kind: FilterKind, order: usize, sample_rate: f64) -> Result<Self, FilterError> {
        Self::with_design(kind, order, sample_rate, FilterDesign::default())
    }

    pub fn with_design(
        kind: FilterKind,
        order: usize,
        sample_rate: f64,
        design: FilterDesign,
    ) -> Result<Self, FilterError> {
        if !(sample_rate > 0.0) {
            return Err(FilterError::InvalidSampleRate(sample_rate));
        }
        let nyquist_hz = sample_rate / 2.0;
        let check = |cutoff_hz: f64| {
            if cutoff_hz > 0.0 && cutoff_hz < nyquist_hz {
                Ok(())
            } else {
                Err(FilterError::InvalidCutoff {
                    cutoff_hz,
                    nyquist_hz,
                })
            }
        };
        match kind {
            FilterKind::Lowpass { cutoff_hz } | FilterKind::Highpass { cutoff_hz } => {
                check(cutoff_hz)?
            }
            FilterKind::Bandpass { low_hz, high_hz } => {
                check(low_hz)?;
                check(high_hz)?;
                if low_hz >= high_hz {
                    return Err(FilterError::InvalidBand { low_hz, high_hz });
                }
            }
        }

        let sections = design.sections(kind, order, sample_rate);
        log::debug!(
            "Designed {:?} filter ({:?}, order {}, {} sections @ {} Hz)",
            kind,
            design,
            order,
            sections.len(),
            sample_rate
        );
        Ok(Self {
            kind,
            order,
            sample_rate,
            design,
            sections,
        })
    }

    pub fn lowpass(cutoff_hz: f64, order: usize, sample_rate: f64) -> Result<Self, FilterError> {
        Self::new(FilterKind::Lowpass { cutoff_hz }, order, sample_rate)
    }

    pub fn highpass(cutoff_hz: f64, order: usize, sample_rate: f64) -> Result<Self, FilterError> {
        Self::new(FilterKind::Highpass { cutoff_hz }, order, sample_rate)
    }

    pub fn bandpass(
        low_hz: f64,
        high_hz: f64,
        order: usize,
        sample_rate: f64,
    ) -> Result<Self, FilterError> {
        Self::new(FilterKind::Bandpass { low_hz, high_hz }, order, sample_rate)
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn design(&self) -> FilterDesign {
        self.design
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Streaming single-sample update
    pub fn process_sample(&mut self, input: f64) -> f64 {
        self.sections
            .iter_mut()
            .fold(input, |value, section| section.process(value))
    }

    /// Stream a whole block through the filter, continuing from the current state
    pub fn process_block(&mut self, input: &[f64]) -> Vec<f64> {
        input.iter().map(|&x| self.process_sample(x)).collect()
    }

    /// Zero the streaming state in place
    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }

    pub fn state(&self) -> FilterState {
        FilterState(self.sections.iter().map(|s| s.state).collect())
    }

    pub fn restore_state(&mut self, state: &FilterState) {
        for (section, saved) in self.sections.iter_mut().zip(state.0.iter()) {
            section.state = *saved;
        }
    }

    /// Zero-phase forward-backward filtering
    ///
    /// Inputs of length 3 or less are returned unchanged. The streaming state
    /// in effect before the call is in effect again after it.
    pub fn filtfilt(&mut self, input: &[f64]) -> Vec<f64> {
        if input.len() <= 3 {
            return input.to_vec();
        }

        let saved = self.state();

        self.reset();
        let mut forward = self.process_block(input);
        forward.reverse();

        self.reset();
        let mut output = self.process_block(&forward);
        output.reverse();

        self.restore_state(&saved);
        output
    }
}

//! # Muscle Activity Event Detector
//!
//! Turns the normalized IR stream into closed Activity/Rest intervals without
//! keeping raw samples: each open interval carries only running sums and the
//! snapshot at its start.
//!
//! ## Per-sample flow
//! 1. Classify: normalized IR above the threshold is Activity, otherwise Rest.
//! 2. Same label as the open interval: fold the sample in, drop any pending crossing.
//! 3. Different label: start (or keep) a pending crossing. Once the crossing has
//!    been pending for `debounce_ms`, the open interval is closed at the
//!    crossing's first sample and a new one starts there (backdated).
//! 4. Closed intervals shorter than `minimum_event_duration_ms` are dropped.
//!
//! Debounce continuity is a two-sample check: the pending crossing's first
//! sample against the current one. A single sample back on the current label
//! clears the crossing; there is no windowed majority vote.
//!
//! Every emitted event carries `is_valid`, whether biometrics proved skin
//! contact within the validation window ending at the event's end. Invalid
//! events are still emitted.

use crate::biometrics::{BiometricHistory, PositioningRule, SleepState};
use crate::calibration::{CalibrationManager, CalibrationState};
use crate::config::{BiometricsConfig, CalibrationConfig, Config, EventDetectorConfig};
use crate::output::DetectorOutput;
use crate::sample::{AccelSnapshot, IrSample};
use serde::{Deserialize, Serialize};

/// Bytes a raw sample would occupy if buffered (PPG + accelerometer + timestamp)
const RAW_SAMPLE_BYTES: usize = 12 + 6 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    Activity,
    Rest,
}

/// A closed, immutable muscle-activity interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuscleActivityEvent {
    pub event_number: u64,
    pub kind: ActivityKind,
    pub start_time: u64,
    pub end_time: u64,
    pub start_ir: f64,
    pub end_ir: f64,
    pub average_ir: f64,
    pub start_normalized: Option<f64>,
    pub end_normalized: Option<f64>,
    pub average_normalized: Option<f64>,
    pub baseline: Option<f64>,
    pub start_accel: Option<AccelSnapshot>,
    pub start_temperature: Option<f64>,
    pub hr_at_end: Option<f64>,
    pub spo2_at_end: Option<f64>,
    pub sleep_state_at_end: Option<SleepState>,
    pub is_valid: bool,
}

impl MuscleActivityEvent {
    pub fn duration_ms(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

/// Counters for monitoring detector health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub samples_processed: u64,
    /// Samples that arrived while no baseline was available
    pub samples_discarded: u64,
    pub calibration_samples: u64,
    pub events_emitted: u64,
    pub valid_events: u64,
    pub invalid_events: u64,
    pub short_events_discarded: u64,
}

impl DetectorStats {
    /// Storage saved by emitting events instead of buffering raw samples, in percent
    pub fn memory_reduction_percent(&self) -> Option<f64> {
        let total_samples = self.samples_processed + self.samples_discarded + self.calibration_samples;
        if total_samples == 0 {
            return None;
        }
        let raw_bytes = total_samples as f64 * RAW_SAMPLE_BYTES as f64;
        let event_bytes =
            self.events_emitted as f64 * std::mem::size_of::<MuscleActivityEvent>() as f64;
        Some(((1.0 - event_bytes / raw_bytes) * 100.0).max(0.0))
    }
}

/// Everything remembered about a single sample at an interval boundary
#[derive(Debug, Clone, Copy, PartialEq)]
struct Snapshot {
    timestamp: u64,
    ir: f64,
    normalized: f64,
    accel: Option<AccelSnapshot>,
    temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
struct OpenEvent {
    kind: ActivityKind,
    start: Snapshot,
    ir_sum: f64,
    normalized_sum: f64,
    sample_count: u64,
}

impl OpenEvent {
    fn start(kind: ActivityKind, sample: Snapshot) -> Self {
        Self {
            kind,
            start: sample,
            ir_sum: sample.ir,
            normalized_sum: sample.normalized,
            sample_count: 1,
        }
    }

    /// Open an interval at an earlier boundary, crediting the samples that
    /// fell inside the debounce period
    fn backdated(kind: ActivityKind, boundary: Snapshot, current: Snapshot, credited: u64) -> Self {
        Self {
            kind,
            start: boundary,
            ir_sum: current.ir * credited as f64,
            normalized_sum: current.normalized * credited as f64,
            sample_count: credited,
        }
    }

    fn fold(&mut self, sample: &Snapshot) {
        self.ir_sum += sample.ir;
        self.normalized_sum += sample.normalized;
        self.sample_count += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingCrossing {
    kind: ActivityKind,
    start: Snapshot,
}

/// An interval that has just been closed but not yet turned into a record
#[derive(Debug, Clone, PartialEq)]
struct ClosedEvent {
    event: OpenEvent,
    end: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Default)]
enum Phase {
    #[default]
    NoEvent,
    InEvent {
        event: OpenEvent,
        pending: Option<PendingCrossing>,
    },
}

impl Phase {
    /// Pure transition: `(phase, sample) -> (phase, closed interval)`
    fn advance(
        self,
        sample: Snapshot,
        candidate: ActivityKind,
        config: &EventDetectorConfig,
    ) -> (Phase, Option<ClosedEvent>) {
        match self {
            Phase::NoEvent => (
                Phase::InEvent {
                    event: OpenEvent::start(candidate, sample),
                    pending: None,
                },
                None,
            ),
            Phase::InEvent { mut event, pending } => {
                if candidate == event.kind {
                    event.fold(&sample);
                    return (Phase::InEvent { event, pending: None }, None);
                }

                match pending {
                    Some(crossing)
                        if crossing.kind == candidate
                            && sample.timestamp.saturating_sub(crossing.start.timestamp)
                                >= config.debounce_ms =>
                    {
                        let credited =
                            (config.debounce_ms / config.nominal_sample_interval_ms.max(1)).max(1);
                        let next =
                            OpenEvent::backdated(candidate, crossing.start, sample, credited);
                        (
                            Phase::InEvent {
                                event: next,
                                pending: None,
                            },
                            Some(ClosedEvent {
                                event,
                                end: crossing.start,
                            }),
                        )
                    }
                    Some(crossing) if crossing.kind == candidate => {
                        event.fold(&sample);
                        (
                            Phase::InEvent {
                                event,
                                pending: Some(crossing),
                            },
                            None,
                        )
                    }
                    _ => {
                        event.fold(&sample);
                        (
                            Phase::InEvent {
                                event,
                                pending: Some(PendingCrossing {
                                    kind: candidate,
                                    start: sample,
                                }),
                            },
                            None,
                        )
                    }
                }
            }
        }
    }
}

pub struct MuscleEventDetector {
    config: EventDetectorConfig,
    calibration: CalibrationManager,
    biometrics: BiometricHistory,
    rule: PositioningRule,
    phase: Phase,
    last_sample: Option<Snapshot>,
    next_event_number: u64,
    stats: DetectorStats,
}

impl MuscleEventDetector {
    pub fn new(
        config: EventDetectorConfig,
        calibration: CalibrationConfig,
        biometrics: &BiometricsConfig,
    ) -> Self {
        Self {
            config,
            calibration: CalibrationManager::new(calibration),
            biometrics: BiometricHistory::new(biometrics),
            rule: PositioningRule::for_events(biometrics),
            phase: Phase::NoEvent,
            last_sample: None,
            next_event_number: 1,
            stats: DetectorStats::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.event_detector.clone(),
            config.calibration.clone(),
            &config.biometrics,
        )
    }

    pub fn config(&self) -> &EventDetectorConfig {
        &self.config
    }

    pub fn stats(&self) -> &DetectorStats {
        &self.stats
    }

    pub fn calibration(&self) -> &CalibrationManager {
        &self.calibration
    }

    pub fn calibration_state(&self) -> &CalibrationState {
        self.calibration.state()
    }

    pub fn biometrics(&self) -> &BiometricHistory {
        &self.biometrics
    }

    /// Label of the open interval, if any
    pub fn current_kind(&self) -> Option<ActivityKind> {
        match &self.phase {
            Phase::NoEvent => None,
            Phase::InEvent { event, .. } => Some(event.kind),
        }
    }

    /// Label of an unconfirmed crossing, if one is pending
    pub fn pending_kind(&self) -> Option<ActivityKind> {
        match &self.phase {
            Phase::InEvent {
                pending: Some(crossing),
                ..
            } => Some(crossing.kind),
            _ => None,
        }
    }

    /// Begin recalibrating. The open interval is closed at the last processed
    /// sample against the old baseline, so nothing spans the calibration window.
    pub fn start_calibration(&mut self) -> Option<MuscleActivityEvent> {
        let closed = self
            .last_sample
            .and_then(|last| self.finalize_current_event(last.timestamp));
        self.phase = Phase::NoEvent;
        self.last_sample = None;
        self.calibration.start_calibration();
        closed
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

    /// Whether biometrics prove skin contact at `t`
    pub fn is_device_positioned(&self, t: u64) -> bool {
        self.biometrics.is_positioned(t, &self.rule)
    }

    /// Process one sample; returns a calibration update or a closed event
    pub fn process_sample(&mut self, sample: &IrSample) -> Option<DetectorOutput> {
        if self.calibration.is_calibrating() {
            self.stats.calibration_samples += 1;
            return self
                .calibration
                .add_sample(sample.ir, sample.timestamp)
                .map(DetectorOutput::Calibration);
        }

        let Some(normalized) = self.calibration.normalize(sample.ir) else {
            self.stats.samples_discarded += 1;
            return None;
        };
        self.stats.samples_processed += 1;

        let snapshot = Snapshot {
            timestamp: sample.timestamp,
            ir: sample.ir,
            normalized,
            accel: sample.accel,
            temperature: sample.temperature,
        };
        self.last_sample = Some(snapshot);

        let candidate = if normalized > self.config.threshold_percent {
            ActivityKind::Activity
        } else {
            ActivityKind::Rest
        };

        let phase = std::mem::take(&mut self.phase);
        let (phase, closed) = phase.advance(snapshot, candidate, &self.config);
        self.phase = phase;

        if let Some(closed) = &closed {
            log::debug!(
                "{:?} -> {:?} committed at {} (backdated from {})",
                closed.event.kind,
                candidate,
                sample.timestamp,
                closed.end.timestamp
            );
        }
        closed
            .and_then(|closed| self.emit(closed))
            .map(DetectorOutput::Event)
    }

    /// Force-close the open interval at `timestamp`, e.g. when a session stops
    pub fn finalize_current_event(&mut self, timestamp: u64) -> Option<MuscleActivityEvent> {
        let Phase::InEvent { event, .. } = std::mem::take(&mut self.phase) else {
            return None;
        };
        let mut end = self.last_sample.unwrap_or(event.start);
        end.timestamp = timestamp;
        self.emit(ClosedEvent { event, end })
    }

    fn emit(&mut self, closed: ClosedEvent) -> Option<MuscleActivityEvent> {
        let ClosedEvent { event, end } = closed;
        let duration = end.timestamp.saturating_sub(event.start.timestamp);
        if duration < self.config.minimum_event_duration_ms {
            self.stats.short_events_discarded += 1;
            log::debug!(
                "Discarded {:?} interval of {} ms (< {} ms)",
                event.kind,
                duration,
                self.config.minimum_event_duration_ms
            );
            return None;
        }

        let count = event.sample_count.max(1) as f64;
        let is_valid = self.is_device_positioned(end.timestamp);
        let record = MuscleActivityEvent {
            event_number: self.next_event_number,
            kind: event.kind,
            start_time: event.start.timestamp,
            end_time: end.timestamp,
            start_ir: event.start.ir,
            end_ir: end.ir,
            average_ir: event.ir_sum / count,
            start_normalized: Some(event.start.normalized),
            end_normalized: Some(end.normalized),
            average_normalized: Some(event.normalized_sum / count),
            baseline: self.calibration.baseline(),
            start_accel: event.start.accel,
            start_temperature: event.start.temperature,
            hr_at_end: self.biometrics.latest_hr_at(end.timestamp),
            spo2_at_end: self.biometrics.latest_spo2_at(end.timestamp),
            sleep_state_at_end: self.biometrics.latest_sleep_at(end.timestamp),
            is_valid,
        };

        self.next_event_number += 1;
        self.stats.events_emitted += 1;
        if is_valid {
            self.stats.valid_events += 1;
        } else {
            self.stats.invalid_events += 1;
        }
        log::info!(
            "Event #{} {:?}: {} ms, avg {:.1}%{}",
            record.event_number,
            record.kind,
            duration,
            record.average_normalized.unwrap_or(0.0),
            if is_valid { "" } else { " (invalid)" }
        );
        Some(record)
    }

    /// Clear interval state and counters; calibration and biometrics are kept
    pub fn reset(&mut self) {
        self.phase = Phase::NoEvent;
        self.last_sample = None;
        self.next_event_number = 1;
        self.stats = DetectorStats::default();
    }

    /// `reset` plus calibration and biometric history
    pub fn full_reset(&mut self) {
        self.reset();
        self.calibration.reset();
        self.biometrics.clear();
    }
}

impl Default for MuscleEventDetector {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

//! # Synthetic Wearable Module
//!
//! Deterministic stand-in for a connected device. Replays a scripted session
//! as the same encoded notifications a real sensor would send, so the whole
//! pipeline can be exercised offline and reproducibly.
//!
//! Each iteration yields the commands for one 100 ms notification tick:
//! biometrics (1 Hz), temperature (every 5 s), battery (every 30 s), one
//! accelerometer packet and one PPG packet.

use crate::biometrics::SleepState;
use crate::packet::{
    encode_accel_packet, encode_battery_packet, encode_ppg_packet, encode_temperature_packet,
    sample_timestamp, ACC_SAMPLE_INTERVAL_MS, PPG_SAMPLE_INTERVAL_MS,
};
use crate::pipeline::{BiometricUpdate, PipelineCommand, RawPacket, StreamKind};
use crate::sample::{AccelSample, PpgSample};
use std::f64::consts::PI;

const TICK_MS: u64 = 100;
const PULSE_AMPLITUDE: f64 = 300.0;
const NOISE_AMPLITUDE: f64 = 50.0;
const GRAVITY_MG: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Sensor resting still on skin; used for calibration
    Still,
    Rest,
    Activity,
    /// Sensor off skin: no biometrics are reported
    OffBody,
}

/// One scripted stretch of a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub duration_ms: u64,
    /// IR level relative to the resting baseline (1.6 = +60 %)
    pub ir_factor: f64,
    pub heart_rate_bpm: f64,
}

impl Segment {
    pub fn new(kind: SegmentKind, duration_ms: u64, ir_factor: f64, heart_rate_bpm: f64) -> Self {
        Self {
            kind,
            duration_ms,
            ir_factor,
            heart_rate_bpm,
        }
    }
}

/// Session used by the demo binary
pub fn default_session() -> Vec<Segment> {
    vec![
        Segment::new(SegmentKind::Still, 16_000, 1.0, 64.0),
        Segment::new(SegmentKind::Rest, 20_000, 1.0, 66.0),
        Segment::new(SegmentKind::Activity, 8_000, 1.6, 88.0),
        Segment::new(SegmentKind::Rest, 15_000, 1.0, 74.0),
        Segment::new(SegmentKind::Activity, 5_000, 1.55, 92.0),
        Segment::new(SegmentKind::Rest, 10_000, 1.0, 70.0),
    ]
}

pub struct Simulator {
    segments: Vec<Segment>,
    start_time: u64,
    baseline_ir: f64,
    elapsed_ms: u64,
    total_ms: u64,
    frame_counter: u32,
    phase: f64,
    rng: u64,
}

impl Simulator {
    pub fn new(segments: Vec<Segment>, start_time: u64) -> Self {
        let total_ms = segments.iter().map(|s| s.duration_ms).sum();
        Self {
            segments,
            start_time,
            baseline_ir: 100_000.0,
            elapsed_ms: 0,
            total_ms,
            frame_counter: 0,
            phase: 0.0,
            rng: 0x2545_f491_4f6c_dd1d,
        }
    }

    pub fn with_baseline(mut self, baseline_ir: f64) -> Self {
        self.baseline_ir = baseline_ir;
        self
    }

    pub fn duration_ms(&self) -> u64 {
        self.total_ms
    }

    /// Timestamp of the last sample the session will produce
    pub fn end_time(&self) -> u64 {
        self.start_time + self.total_ms.saturating_sub(PPG_SAMPLE_INTERVAL_MS)
    }

    fn segment_at(&self, offset_ms: u64) -> Option<&Segment> {
        let mut end = 0;
        self.segments.iter().find(|s| {
            end += s.duration_ms;
            offset_ms < end
        })
    }

    /// xorshift64; uniform noise in `[-1, 1]`
    fn noise(&mut self) -> f64 {
        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 7;
        self.rng ^= self.rng << 17;
        (self.rng % 20_001) as f64 / 10_000.0 - 1.0
    }

    fn ppg_sample(&mut self, segment: Segment, timestamp: u64) -> PpgSample {
        self.phase += 2.0 * PI * segment.heart_rate_bpm / 60.0 * PPG_SAMPLE_INTERVAL_MS as f64 / 1_000.0;
        let pulse = PULSE_AMPLITUDE * self.phase.sin();
        let ir = self.baseline_ir * segment.ir_factor + pulse + NOISE_AMPLITUDE * self.noise();
        PpgSample {
            red: (ir * 0.8) as i32,
            ir: ir as i32,
            green: (ir * 0.5) as i32,
            timestamp,
        }
    }

    fn accel_sample(&mut self, segment: Segment, timestamp: u64) -> AccelSample {
        let motion = match segment.kind {
            SegmentKind::Activity => 300.0,
            _ => 5.0,
        };
        AccelSample {
            x: (motion * self.noise()) as i16,
            y: (motion * self.noise()) as i16,
            z: (GRAVITY_MG + motion * self.noise()) as i16,
            timestamp,
        }
    }

    fn packet(stream: StreamKind, bytes: Vec<u8>, notification_time: u64) -> PipelineCommand {
        PipelineCommand::Packet(RawPacket {
            stream,
            bytes,
            notification_time,
        })
    }

    fn tick(&mut self) -> Option<Vec<PipelineCommand>> {
        let segment = *self.segment_at(self.elapsed_ms)?;
        let tick_start = self.elapsed_ms;
        let now = self.start_time + tick_start + TICK_MS - PPG_SAMPLE_INTERVAL_MS;
        let mut commands = Vec::new();

        if tick_start % 1_000 == 0 && segment.kind != SegmentKind::OffBody {
            commands.push(PipelineCommand::Biometric {
                update: BiometricUpdate::HeartRate(segment.heart_rate_bpm),
                timestamp: now,
            });
            commands.push(PipelineCommand::Biometric {
                update: BiometricUpdate::PerfusionIndex(0.02),
                timestamp: now,
            });
        }
        if tick_start % 5_000 == 0 {
            commands.push(PipelineCommand::Biometric {
                update: BiometricUpdate::Sleep(SleepState::Awake),
                timestamp: now,
            });
            let celsius = 33.0 + tick_start as f64 / 600_000.0;
            commands.push(Self::packet(
                StreamKind::Temperature,
                encode_temperature_packet(self.frame_counter, celsius),
                now,
            ));
        }
        if tick_start % 30_000 == 0 {
            let millivolts = 4_000 - (tick_start / 60_000) as i32;
            commands.push(Self::packet(
                StreamKind::Battery,
                encode_battery_packet(millivolts),
                now,
            ));
        }

        let accel_count = (TICK_MS / ACC_SAMPLE_INTERVAL_MS) as usize;
        let accel: Vec<AccelSample> = (0..accel_count)
            .map(|i| {
                let t = sample_timestamp(now, i, accel_count, ACC_SAMPLE_INTERVAL_MS);
                self.accel_sample(segment, t)
            })
            .collect();
        commands.push(Self::packet(
            StreamKind::Accelerometer,
            encode_accel_packet(self.frame_counter, &accel),
            now,
        ));

        let ppg_count = (TICK_MS / PPG_SAMPLE_INTERVAL_MS) as usize;
        let ppg: Vec<PpgSample> = (0..ppg_count)
            .map(|i| {
                let t = sample_timestamp(now, i, ppg_count, PPG_SAMPLE_INTERVAL_MS);
                self.ppg_sample(segment, t)
            })
            .collect();
        commands.push(Self::packet(
            StreamKind::Ppg,
            encode_ppg_packet(self.frame_counter, &ppg),
            now,
        ));

        self.frame_counter = self.frame_counter.wrapping_add(1);
        self.elapsed_ms += TICK_MS;
        Some(commands)
    }
}

impl Iterator for Simulator {
    type Item = Vec<PipelineCommand>;

    fn next(&mut self) -> Option<Self::Item> {
        self.tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationUpdate;
    use crate::config::Config;
    use crate::event_detector::ActivityKind;
    use crate::packet::decode_ppg_packet;
    use crate::pipeline::{DevicePipeline, PipelineUpdate};
    use crate::state_detector::DeviceRecordingState;
    use crossbeam_channel::unbounded;

    const START: u64 = 1_700_000_000_000;

    #[test]
    fn test_deterministic() {
        let a: Vec<_> = Simulator::new(default_session(), START).take(50).collect();
        let b: Vec<_> = Simulator::new(default_session(), START).take(50).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_tick_count_and_timestamps() {
        let sim = Simulator::new(default_session(), START);
        assert_eq!(sim.duration_ms(), 74_000);
        let end_time = sim.end_time();

        let mut last_ppg = None;
        let mut ticks = 0;
        for commands in sim {
            ticks += 1;
            for command in commands {
                if let PipelineCommand::Packet(packet) = command {
                    if packet.stream == StreamKind::Ppg {
                        let decoded =
                            decode_ppg_packet(&packet.bytes, packet.notification_time).unwrap();
                        assert_eq!(decoded.samples.len(), 5);
                        if let Some(prev) = last_ppg {
                            assert_eq!(decoded.samples[0].timestamp, prev + 20);
                        }
                        last_ppg = decoded.samples.last().map(|s| s.timestamp);
                    }
                }
            }
        }
        assert_eq!(ticks, 740);
        assert_eq!(last_ppg, Some(end_time));
    }

    #[test]
    fn test_off_body_sends_no_biometrics() {
        let sim = Simulator::new(
            vec![Segment::new(SegmentKind::OffBody, 5_000, 0.2, 0.0)],
            START,
        );
        let biometrics = sim
            .flatten()
            .filter(|c| matches!(c, PipelineCommand::Biometric { update: BiometricUpdate::HeartRate(_), .. }))
            .count();
        assert_eq!(biometrics, 0);
    }

    #[test]
    fn test_default_session_end_to_end() {
        let (tx, rx) = unbounded();
        let mut pipeline = DevicePipeline::new(&Config::default(), tx).unwrap();
        pipeline.start_calibration();

        let sim = Simulator::new(default_session(), START);
        let end_time = sim.end_time();
        for command in sim.flatten() {
            pipeline.handle_command(command);
        }
        pipeline.finalize(end_time);

        let updates: Vec<PipelineUpdate> = rx.try_iter().collect();

        let baseline = updates.iter().find_map(|u| match u {
            PipelineUpdate::Calibration(CalibrationUpdate::Completed(result)) => {
                Some(result.baseline)
            }
            _ => None,
        });
        assert!((baseline.unwrap() - 100_000.0).abs() < 500.0);

        let activity: Vec<_> = updates
            .iter()
            .filter_map(|u| match u {
                PipelineUpdate::Event(e) if e.kind == ActivityKind::Activity => Some(e),
                _ => None,
            })
            .collect();
        assert_eq!(activity.len(), 2);
        assert!(activity.iter().all(|e| e.is_valid));
        assert_eq!(activity[0].start_time, START + 36_000);

        assert!(updates.iter().any(|u| matches!(
            u,
            PipelineUpdate::StateTransition(e) if e.state == DeviceRecordingState::Activity
        )));
        assert!(updates.iter().any(|u| matches!(u, PipelineUpdate::Battery(_))));
        assert!(!updates
            .iter()
            .any(|u| matches!(u, PipelineUpdate::PacketRejected { .. })));
    }
}

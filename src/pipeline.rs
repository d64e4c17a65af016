//! # Device Pipeline Module
//!
//! Per-device wiring from raw notification payloads to emitted records.
//!
//! ## Data Flow
//! ```text
//! RawPacket --decode--> PpgSample --+--> IrDcProcessor (DC trace, shift)
//!                                   +--> HeartRateEstimator (side output)
//!                                   +--> MuscleEventDetector  --+
//!                                   +--> StateTransitionDetector+--> PipelineUpdate channel
//! ACC / temperature / battery ------> DeviceSnapshot -----------+
//! Biometric updates ----------------> both detectors + snapshot
//! ```
//!
//! A pipeline owns all of its processors; distinct devices get distinct
//! pipelines and share nothing. `DevicePipeline::spawn` runs one on its own
//! thread, driven by `PipelineCommand`s over a crossbeam channel.

use crate::biometrics::SleepState;
use crate::calibration::CalibrationUpdate;
use crate::config::{Config, PipelineConfig, PpgChannel};
use crate::error::{DecodeError, FilterError};
use crate::event_detector::{DetectorStats, MuscleActivityEvent, MuscleEventDetector};
use crate::heart_rate::{build_estimator, HeartRateEstimate, HeartRateEstimator};
use crate::ir_dc::IrDcProcessor;
use crate::output::{DetectorOutput, DeviceSnapshot, StateTransitionEvent};
use crate::packet::{
    battery_percentage, decode_accel_packet, decode_battery_packet, decode_ppg_packet,
    decode_temperature_packet, BatteryData,
};
use crate::sample::{IrSample, PpgSample, Sample};
use crate::state_detector::StateTransitionDetector;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Notification stream a payload arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Ppg,
    Accelerometer,
    Temperature,
    Battery,
}

/// One undecoded notification payload
#[derive(Debug, Clone, PartialEq)]
pub struct RawPacket {
    pub stream: StreamKind,
    pub bytes: Vec<u8>,
    /// Time the notification was received, in ms
    pub notification_time: u64,
}

/// Side-channel metric reported by the device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BiometricUpdate {
    HeartRate(f64),
    Spo2(f64),
    PerfusionIndex(f64),
    Sleep(SleepState),
    Temperature(f64),
}

/// Commands accepted by a running pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCommand {
    Packet(RawPacket),
    Biometric {
        update: BiometricUpdate,
        timestamp: u64,
    },
    StartCalibration,
    CancelCalibration,
    RestoreBaseline(f64),
    /// Close the open event at the given timestamp
    Finalize(u64),
    Reset,
    Stop,
}

/// Records published by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineUpdate {
    Calibration(CalibrationUpdate),
    Event(MuscleActivityEvent),
    StateTransition(StateTransitionEvent),
    HeartRate(HeartRateEstimate),
    /// IR DC dropped by more than the configured threshold
    BaselineShift { shift: f64, timestamp: u64 },
    Battery(BatteryData),
    PacketRejected { stream: StreamKind, error: DecodeError },
    Stopped(DetectorStats),
}

pub struct DevicePipeline {
    config: PipelineConfig,
    ir_dc: IrDcProcessor,
    heart_rate: Box<dyn HeartRateEstimator>,
    events: MuscleEventDetector,
    states: StateTransitionDetector,
    snapshot: DeviceSnapshot,
    sender: Sender<PipelineUpdate>,
    last_hr_query: Option<u64>,
    shift_active: bool,
}

impl DevicePipeline {
    pub fn new(config: &Config, sender: Sender<PipelineUpdate>) -> Result<Self, FilterError> {
        Ok(Self {
            config: config.pipeline.clone(),
            ir_dc: IrDcProcessor::new(config.ir_dc.clone())?,
            heart_rate: build_estimator(&config.heart_rate)?,
            events: MuscleEventDetector::from_config(config),
            states: StateTransitionDetector::from_config(config),
            snapshot: DeviceSnapshot::default(),
            sender,
            last_hr_query: None,
            shift_active: false,
        })
    }

    /// Run a pipeline on its own thread
    ///
    /// Returns the command sender and the thread handle. The thread exits on
    /// `PipelineCommand::Stop` or when every command sender is dropped.
    pub fn spawn(
        config: &Config,
        updates: Sender<PipelineUpdate>,
    ) -> Result<(Sender<PipelineCommand>, JoinHandle<()>), FilterError> {
        let pipeline = Self::new(config, updates)?;
        let (command_tx, command_rx) = unbounded();
        let handle = thread::spawn(move || pipeline.run(command_rx));
        Ok((command_tx, handle))
    }

    pub fn events(&self) -> &MuscleEventDetector {
        &self.events
    }

    pub fn states(&self) -> &StateTransitionDetector {
        &self.states
    }

    pub fn ir_dc(&self) -> &IrDcProcessor {
        &self.ir_dc
    }

    pub fn snapshot(&self) -> &DeviceSnapshot {
        &self.snapshot
    }

    /// Command loop
    pub fn run(mut self, commands: Receiver<PipelineCommand>) {
        log::info!("Pipeline started ({} heart rate)", self.heart_rate.name());
        loop {
            match commands.recv() {
                Ok(PipelineCommand::Stop) => {
                    self.finish();
                    log::info!("Pipeline stopped");
                    break;
                }
                Ok(command) => self.handle_command(command),
                Err(_) => {
                    log::info!("Pipeline: command channel closed");
                    self.finish();
                    break;
                }
            }
        }
    }

    fn finish(&mut self) {
        self.finalize(self.snapshot.timestamp);
        self.send(PipelineUpdate::Stopped(*self.events.stats()));
    }

    pub fn handle_command(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::Packet(packet) => {
                // Rejections are already published; the next packet is awaited
                let _ = self.handle_packet(&packet);
            }
            PipelineCommand::Biometric { update, timestamp } => {
                self.handle_biometric(update, timestamp)
            }
            PipelineCommand::StartCalibration => self.start_calibration(),
            PipelineCommand::CancelCalibration => {
                self.events.cancel_calibration();
                self.states.cancel_calibration();
            }
            PipelineCommand::RestoreBaseline(baseline) => self.restore_baseline(baseline),
            PipelineCommand::Finalize(timestamp) => self.finalize(timestamp),
            PipelineCommand::Reset => self.reset(),
            PipelineCommand::Stop => self.finish(),
        }
    }

    pub fn start_calibration(&mut self) {
        log::info!("Calibration started, keep the sensor still");
        if let Some(event) = self.events.start_calibration() {
            self.send(PipelineUpdate::Event(event));
        }
        self.states.start_calibration();
    }

    pub fn restore_baseline(&mut self, baseline: f64) {
        let restored = self
            .events
            .restore_baseline(baseline)
            .and_then(|_| self.states.restore_baseline(baseline))
            .and_then(|_| self.ir_dc.set_baseline(baseline));
        match restored {
            Ok(()) => log::info!("Restored baseline {:.0}", baseline),
            Err(err) => {
                log::warn!("Could not restore baseline: {}", err);
                self.send(PipelineUpdate::Calibration(CalibrationUpdate::Failed(err)));
            }
        }
    }

    pub fn finalize(&mut self, timestamp: u64) {
        if let Some(event) = self.events.finalize_current_event(timestamp) {
            self.send(PipelineUpdate::Event(event));
        }
    }

    /// Clear per-session state; baselines and biometric history survive
    pub fn reset(&mut self) {
        self.events.reset();
        self.states.reset();
        self.ir_dc.reset();
        self.heart_rate.reset();
        self.last_hr_query = None;
        self.shift_active = false;
    }

    pub fn handle_biometric(&mut self, update: BiometricUpdate, timestamp: u64) {
        match update {
            BiometricUpdate::HeartRate(bpm) => {
                self.snapshot.hr = Some(bpm);
                self.events.update_hr(bpm, timestamp);
                self.states.update_hr(bpm, timestamp);
            }
            BiometricUpdate::Spo2(percent) => {
                self.snapshot.spo2 = Some(percent);
                self.events.update_spo2(percent, timestamp);
                self.states.update_spo2(percent, timestamp);
            }
            BiometricUpdate::PerfusionIndex(pi) => {
                self.snapshot.perfusion_index = Some(pi);
                self.events.update_perfusion_index(pi, timestamp);
                self.states.update_perfusion_index(pi, timestamp);
            }
            BiometricUpdate::Sleep(state) => {
                self.snapshot.sleep_state = Some(state);
                self.events.update_sleep(state, timestamp);
                self.states.update_sleep(state, timestamp);
            }
            BiometricUpdate::Temperature(celsius) => self.record_temperature(celsius, timestamp),
        }
    }

    fn record_temperature(&mut self, celsius: f64, timestamp: u64) {
        self.snapshot.temperature = Some(celsius);
        self.events.update_temperature(celsius, timestamp);
        self.states.update_temperature(celsius, timestamp);
    }

    /// Decode one payload and feed its samples through
    pub fn handle_packet(&mut self, packet: &RawPacket) -> Result<(), DecodeError> {
        let decoded = self.decode_and_apply(packet);
        if let Err(err) = &decoded {
            log::warn!("Dropped {:?} packet: {}", packet.stream, err);
            self.send(PipelineUpdate::PacketRejected {
                stream: packet.stream,
                error: err.clone(),
            });
        }
        decoded
    }

    fn decode_and_apply(&mut self, packet: &RawPacket) -> Result<(), DecodeError> {
        let time = packet.notification_time;
        for sample in decode(packet)? {
            match sample {
                Sample::Ppg(ppg) => self.process_ppg(&ppg),
                Sample::Accelerometer(accel) => self.snapshot.accel = Some(accel.snapshot()),
                Sample::Temperature { celsius } => self.record_temperature(celsius, time),
                Sample::Battery { millivolts } => {
                    let battery = BatteryData {
                        millivolts,
                        percentage: battery_percentage(millivolts),
                        timestamp: time,
                    };
                    self.snapshot.battery = Some(battery);
                    self.send(PipelineUpdate::Battery(battery));
                }
            }
        }
        Ok(())
    }

    /// Feed one optical sample to every processor
    pub fn process_ppg(&mut self, sample: &PpgSample) {
        let ir = sample.ir as f64;
        let timestamp = sample.timestamp;
        self.snapshot.timestamp = timestamp;
        self.snapshot.raw_ir = Some(ir);
        self.snapshot.ir_dc = Some(self.ir_dc.process_sample(ir));

        let shifted = self.ir_dc.has_default_significant_shift();
        if shifted && !self.shift_active {
            if let Some(shift) = self.ir_dc.baseline_shift() {
                log::debug!("IR DC dropped by {:.0}", shift);
                self.send(PipelineUpdate::BaselineShift { shift, timestamp });
            }
        }
        self.shift_active = shifted;

        self.update_heart_rate(sample);

        let mut input = IrSample::from(sample);
        input.accel = self.snapshot.accel;
        input.temperature = self.snapshot.temperature;

        if let Some(output) = self.events.process_sample(&input) {
            self.forward(output);
        }
        match self.states.process_sample(&input) {
            // Calibration progress is already reported by the event detector
            Some(DetectorOutput::Calibration(_)) | None => {}
            Some(output) => self.forward(output),
        }
    }

    fn update_heart_rate(&mut self, sample: &PpgSample) {
        let value = f64::from(match self.config.heart_rate_channel {
            PpgChannel::Red => sample.red,
            PpgChannel::Ir => sample.ir,
            PpgChannel::Green => sample.green,
        });
        self.heart_rate.add_sample(value, sample.timestamp);

        let due = self.last_hr_query.map_or(true, |last| {
            sample.timestamp.saturating_sub(last) >= self.config.heart_rate_interval_ms
        });
        if !due {
            return;
        }
        self.last_hr_query = Some(sample.timestamp);
        if let Some(estimate) = self.heart_rate.estimate() {
            if estimate.bpm.is_some() {
                self.send(PipelineUpdate::HeartRate(estimate));
            }
        }
    }

    fn forward(&mut self, output: DetectorOutput) {
        match output {
            DetectorOutput::Calibration(update) => {
                if let CalibrationUpdate::Completed(result) = &update {
                    if let Err(err) = self.ir_dc.set_baseline(result.baseline) {
                        log::warn!("IR-DC processor rejected baseline: {}", err);
                    }
                }
                self.send(PipelineUpdate::Calibration(update));
            }
            DetectorOutput::Event(event) => self.send(PipelineUpdate::Event(event)),
            DetectorOutput::Transition(transition) => {
                let event = self
                    .snapshot
                    .transition_event(&transition, self.states.calibration().baseline());
                self.send(PipelineUpdate::StateTransition(event));
            }
        }
    }

    fn send(&self, update: PipelineUpdate) {
        if let Err(why) = self.sender.send(update) {
            log::debug!("Could not send pipeline update: {:?}", why.into_inner());
        }
    }
}

/// Decode a payload into samples, oldest first
pub fn decode(packet: &RawPacket) -> Result<Vec<Sample>, DecodeError> {
    let time = packet.notification_time;
    Ok(match packet.stream {
        StreamKind::Ppg => {
            let ppg = decode_ppg_packet(&packet.bytes, time)?;
            log::trace!("PPG frame {} ({} samples)", ppg.frame_counter, ppg.samples.len());
            ppg.samples.into_iter().map(Sample::Ppg).collect()
        }
        StreamKind::Accelerometer => decode_accel_packet(&packet.bytes, time)?
            .samples
            .into_iter()
            .map(Sample::Accelerometer)
            .collect(),
        StreamKind::Temperature => {
            let temperature = decode_temperature_packet(&packet.bytes, time)?;
            vec![Sample::Temperature {
                celsius: temperature.celsius,
            }]
        }
        StreamKind::Battery => {
            let battery = decode_battery_packet(&packet.bytes, time)?;
            vec![Sample::Battery {
                millivolts: battery.millivolts,
            }]
        }
    })
}

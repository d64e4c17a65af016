use crossbeam_channel::unbounded;
use myosense::calibration::CalibrationUpdate;
use myosense::config::Config;
use myosense::pipeline::{DevicePipeline, PipelineCommand, PipelineUpdate};
use myosense::sample::{now_millis, timestamp_to_datetime};
use myosense::simulator::{default_session, Simulator};
use std::path::Path;
use std::thread;

fn format_time(ms: u64) -> String {
    timestamp_to_datetime(ms)
        .map(|dt| dt.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn report(update: PipelineUpdate) {
    match update {
        PipelineUpdate::Calibration(CalibrationUpdate::Progress(progress)) => {
            log::debug!("Calibrating: {:.0}%", progress * 100.0);
        }
        PipelineUpdate::Calibration(CalibrationUpdate::Completed(result)) => {
            log::info!(
                "Baseline {:.0} from {} samples (CV {:.3})",
                result.baseline,
                result.sample_count,
                result.cv
            );
        }
        PipelineUpdate::Calibration(CalibrationUpdate::Failed(err)) => {
            log::warn!("Calibration failed: {}", err.reason());
        }
        PipelineUpdate::Event(event) => {
            log::info!(
                "{} - {} {:?} #{} avg {:+.1}% valid={}",
                format_time(event.start_time),
                format_time(event.end_time),
                event.kind,
                event.event_number,
                event.average_normalized.unwrap_or(0.0),
                event.is_valid
            );
        }
        PipelineUpdate::StateTransition(event) => {
            log::info!(
                "{} {} -> {} (HR {:?}, battery {:?}%)",
                format_time(event.timestamp),
                event.previous_state,
                event.state,
                event.hr,
                event.battery_percentage
            );
        }
        PipelineUpdate::HeartRate(estimate) => {
            if let Some(bpm) = estimate.bpm.filter(|_| estimate.reliable) {
                log::debug!("{} HR {:.0} bpm", format_time(estimate.timestamp), bpm);
            }
        }
        PipelineUpdate::BaselineShift { shift, timestamp } => {
            log::debug!("{} IR DC dropped by {:.0}", format_time(timestamp), shift);
        }
        PipelineUpdate::Battery(battery) => {
            log::debug!("Battery {} mV ({}%)", battery.millivolts, battery.percentage);
        }
        PipelineUpdate::PacketRejected { stream, error } => {
            log::warn!("{:?} packet rejected: {}", stream, error);
        }
        PipelineUpdate::Stopped(stats) => {
            log::info!(
                "Session done: {} samples, {} events ({} invalid, {} too short)",
                stats.samples_processed,
                stats.events_emitted,
                stats.invalid_events,
                stats.short_events_discarded
            );
            if let Some(reduction) = stats.memory_reduction_percent() {
                log::info!("Memory reduction vs raw buffering: {:.2}%", reduction);
            }
        }
    }
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from(Path::new(&path)),
        None => Config::load(),
    }
    .unwrap_or_else(|e| {
        log::warn!("Using default configuration: {}", e);
        Config::default()
    });

    // Channel from the pipeline thread back to this one
    let (update_tx, update_rx) = unbounded::<PipelineUpdate>();

    let (commands, pipeline) = match DevicePipeline::spawn(&config, update_tx) {
        Ok(spawned) => spawned,
        Err(e) => {
            log::error!("Could not build pipeline: {}", e);
            std::process::exit(1);
        }
    };

    let simulator = Simulator::new(default_session(), now_millis());
    let end_time = simulator.end_time();
    log::info!(
        "Replaying a {} s simulated session",
        simulator.duration_ms() / 1_000
    );

    // Spawn a thread to play the device side
    let device = thread::spawn(move || {
        if commands.send(PipelineCommand::StartCalibration).is_err() {
            return;
        }
        for command in simulator.flatten() {
            if commands.send(command).is_err() {
                log::error!("Pipeline went away mid-session");
                return;
            }
        }
        let _ = commands.send(PipelineCommand::Finalize(end_time));
        let _ = commands.send(PipelineCommand::Stop);
    });

    for update in update_rx.iter() {
        report(update);
    }

    if device.join().is_err() || pipeline.join().is_err() {
        log::error!("A worker thread panicked");
        std::process::exit(1);
    }
}

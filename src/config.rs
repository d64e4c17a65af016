//! # Configuration Management Module
//!
//! Tunable parameters for every processing stage, persisted as TOML in a
//! platform-appropriate location. Every default matches the values the
//! detectors were tuned with, so an empty or partial file is valid.
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/myosense/config.toml
//! - Linux: ~/.config/myosense/config.toml
//! - Windows: %APPDATA%\myosense\config.toml

use crate::error::ConfigError;
use crate::filter::FilterDesign;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Length of the still period in milliseconds
    pub duration_ms: u64,
    pub min_valid_ir: f64,
    pub max_valid_ir: f64,
    pub minimum_samples: usize,
    /// Largest accepted coefficient of variation (stddev / mean)
    pub max_cv: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            duration_ms: 15_000,
            min_valid_ir: 10_000.0,
            max_valid_ir: 5_000_000.0,
            minimum_samples: 500,
            max_cv: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrDcConfig {
    pub sample_rate_hz: f64,
    /// Raw and DC history kept in memory
    pub buffer_seconds: f64,
    pub dc_cutoff_hz: f64,
    pub dc_filter_order: usize,
    pub filter_design: FilterDesign,
    pub rolling_window_seconds: f64,
    pub reference_window_seconds: f64,
    /// Recent raw window the calibration baseline median is taken over
    pub baseline_window_seconds: f64,
    pub max_cv: f64,
    /// Default shift magnitude, in ADC units, that counts as significant
    pub shift_threshold: f64,
    pub activity_threshold_percent: f64,
}

impl Default for IrDcConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 50.0,
            buffer_seconds: 60.0,
            dc_cutoff_hz: 0.8,
            dc_filter_order: 4,
            filter_design: FilterDesign::LegacyRepeated,
            rolling_window_seconds: 5.0,
            reference_window_seconds: 1.0,
            baseline_window_seconds: 10.0,
            max_cv: 1.5,
            shift_threshold: 1_000.0,
            activity_threshold_percent: 40.0,
        }
    }
}

/// Which heart-rate estimator the pipeline runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartRateStrategy {
    /// Single-pole smoothing with adaptive threshold peak picking
    Streaming,
    /// Zero-phase bandpass with prominence-based peak picking
    #[default]
    Batch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartRateConfig {
    pub strategy: HeartRateStrategy,
    pub sample_rate_hz: f64,
    pub min_window_seconds: f64,
    pub max_window_seconds: f64,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Below this standard deviation the signal is treated as flat
    pub flat_stddev: f64,
    // streaming estimator
    pub hp_alpha: f64,
    pub lp_alpha: f64,
    pub threshold_factor: f64,
    // batch estimator
    pub band_low_hz: f64,
    pub band_high_hz: f64,
    pub band_order: usize,
    pub min_peak_distance_seconds: f64,
    pub prominence_factor: f64,
    pub reliable_quality: f64,
}

impl Default for HeartRateConfig {
    fn default() -> Self {
        Self {
            strategy: HeartRateStrategy::Batch,
            sample_rate_hz: 50.0,
            min_window_seconds: 3.0,
            max_window_seconds: 10.0,
            min_bpm: 40.0,
            max_bpm: 180.0,
            flat_stddev: 1.0,
            hp_alpha: 0.05,
            lp_alpha: 0.15,
            threshold_factor: 0.6,
            band_low_hz: 0.5,
            band_high_hz: 8.0,
            band_order: 2,
            min_peak_distance_seconds: 0.4,
            prominence_factor: 0.5,
            reliable_quality: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventDetectorConfig {
    /// Normalized IR percentage above which a sample counts as Activity
    pub threshold_percent: f64,
    pub debounce_ms: u64,
    /// Closed events shorter than this are dropped without a record
    pub minimum_event_duration_ms: u64,
    /// Nominal sample spacing used to credit backdated samples
    pub nominal_sample_interval_ms: u64,
}

impl Default for EventDetectorConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 40.0,
            debounce_ms: 1_000,
            minimum_event_duration_ms: 1_000,
            nominal_sample_interval_ms: 20,
        }
    }
}

/// Debounce per ordered edge between adjacent recording states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateDebounceConfig {
    pub streaming_to_positioned_ms: u64,
    pub positioned_to_activity_ms: u64,
    pub activity_to_positioned_ms: u64,
    pub positioned_to_streaming_ms: u64,
}

impl Default for StateDebounceConfig {
    fn default() -> Self {
        Self {
            streaming_to_positioned_ms: 2_000,
            positioned_to_activity_ms: 1_000,
            activity_to_positioned_ms: 1_000,
            positioned_to_streaming_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateDetectorConfig {
    pub activity_threshold_percent: f64,
    pub debounce: StateDebounceConfig,
}

impl Default for StateDetectorConfig {
    fn default() -> Self {
        Self {
            activity_threshold_percent: 40.0,
            debounce: StateDebounceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiometricsConfig {
    /// Trailing window in which a qualifying metric proves skin contact
    pub validation_window_seconds: u64,
    /// Extra history kept beyond the validation window
    pub retention_margin_seconds: u64,
    pub min_spo2: f64,
    pub min_perfusion_index: f64,
    /// Minimum HR for the state detector; the event detector accepts any positive HR
    pub state_min_hr: f64,
}

impl Default for BiometricsConfig {
    fn default() -> Self {
        Self {
            validation_window_seconds: 180,
            retention_margin_seconds: 60,
            min_spo2: 70.0,
            min_perfusion_index: 0.001,
            state_min_hr: 30.0,
        }
    }
}

/// PPG channel used for heart-rate estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PpgChannel {
    Red,
    #[default]
    Ir,
    Green,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How often the heart-rate estimator is queried
    pub heart_rate_interval_ms: u64,
    pub heart_rate_channel: PpgChannel,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            heart_rate_interval_ms: 1_000,
            heart_rate_channel: PpgChannel::Ir,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub calibration: CalibrationConfig,
    pub ir_dc: IrDcConfig,
    pub heart_rate: HeartRateConfig,
    pub event_detector: EventDetectorConfig,
    pub state_detector: StateDetectorConfig,
    pub biometrics: BiometricsConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Get the path to the config file
    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("myosense")
            .join("config.toml")
    }

    /// Load config from the default location, or create it if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_or_create(&Self::config_path())
    }

    fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        match Self::load_from(path) {
            Err(ConfigError::ReadFailed(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, writing defaults", path.display());
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            other => other,
        }
    }

    /// Load and validate config from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(ConfigError::ReadFailed)?;
        let config: Config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    /// Reject values no detector can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        let cal = &self.calibration;
        if cal.duration_ms == 0 {
            return invalid("calibration.duration_ms must be positive");
        }
        if cal.min_valid_ir <= 0.0 || cal.min_valid_ir >= cal.max_valid_ir {
            return invalid("calibration IR range must satisfy 0 < min < max");
        }
        if cal.max_cv <= 0.0 {
            return invalid("calibration.max_cv must be positive");
        }

        let dc = &self.ir_dc;
        if dc.sample_rate_hz <= 0.0 || dc.dc_cutoff_hz <= 0.0 || dc.dc_cutoff_hz >= dc.sample_rate_hz / 2.0 {
            return invalid("ir_dc.dc_cutoff_hz must lie between 0 and Nyquist");
        }
        if dc.reference_window_seconds <= 0.0
            || dc.reference_window_seconds > dc.rolling_window_seconds
            || dc.rolling_window_seconds > dc.buffer_seconds
        {
            return invalid("ir_dc windows must satisfy 0 < reference <= rolling <= buffer");
        }

        let hr = &self.heart_rate;
        if hr.sample_rate_hz <= 0.0 {
            return invalid("heart_rate.sample_rate_hz must be positive");
        }
        if hr.min_bpm <= 0.0 || hr.min_bpm >= hr.max_bpm {
            return invalid("heart_rate BPM range must satisfy 0 < min < max");
        }
        if hr.min_window_seconds <= 0.0 || hr.min_window_seconds > hr.max_window_seconds {
            return invalid("heart_rate windows must satisfy 0 < min <= max");
        }
        if hr.band_low_hz <= 0.0
            || hr.band_low_hz >= hr.band_high_hz
            || hr.band_high_hz >= hr.sample_rate_hz / 2.0
        {
            return invalid("heart_rate band must satisfy 0 < low < high < Nyquist");
        }

        if self.event_detector.nominal_sample_interval_ms == 0 {
            return invalid("event_detector.nominal_sample_interval_ms must be positive");
        }
        if self.biometrics.validation_window_seconds == 0 {
            return invalid("biometrics.validation_window_seconds must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.calibration.duration_ms, 15_000);
        assert_eq!(config.calibration.minimum_samples, 500);
        assert_eq!(config.event_detector.threshold_percent, 40.0);
        assert_eq!(config.state_detector.debounce.positioned_to_streaming_ms, 3_000);
        assert_eq!(config.biometrics.validation_window_seconds, 180);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_deserialization() {
        let toml_str = r#"
            [event_detector]
            threshold_percent = 25.0

            [heart_rate]
            strategy = "streaming"
        "#;

        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");
        assert_eq!(config.event_detector.threshold_percent, 25.0);
        assert_eq!(config.event_detector.debounce_ms, 1_000);
        assert_eq!(config.heart_rate.strategy, HeartRateStrategy::Streaming);
        assert_eq!(config.calibration, CalibrationConfig::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.calibration.duration_ms = 20_000;
        config.ir_dc.filter_design = FilterDesign::Butterworth;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_or_create(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_parse_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "calibration = 5").unwrap();

        assert!(matches!(Config::load_from(&path), Err(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.calibration.min_valid_ir = 6_000_000.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.heart_rate.band_high_hz = 30.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ir_dc.reference_window_seconds = 10.0;
        assert!(config.validate().is_err());
    }
}

//! Configuration management for acquisition and calibration runs
//!
//! This module provides runtime configuration loading from JSON files.
//! Synthesis normalization, the point-calibration measure, and the default
//! acquisition parameters are all read here once and handed explicitly to
//! the components that need them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub synthesis: SynthesisConfig,
    pub calibration: CalibrationConfig,
    pub acquisition: AcquisitionConfig,
}

/// How swept, noise and recorded waveforms are normalized before scaling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmplitudePolicy {
    /// Divide by the root-mean-square of the raw waveform
    Rms,
    /// Divide by the absolute peak of the raw waveform
    Peak,
}

/// How a single tone-curve response is reduced to one number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointMeasure {
    /// Spectrum magnitude at the bin nearest the presented frequency
    FftPeak,
    /// Root-mean-square of the raw response
    Rms,
    /// Absolute peak of the raw response
    Peak,
}

/// Signal synthesis parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub amplitude_policy: AmplitudePolicy,
    /// Default generation sample rate in Hz
    pub generation_rate: f64,
    /// Attenuation applied to every presentation in dB
    pub attenuation: f64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            amplitude_policy: AmplitudePolicy::Rms,
            generation_rate: 500_000.0,
            attenuation: 0.0,
        }
    }
}

/// Calibration reference and curve processing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub point_measure: PointMeasure,
    /// Moving average width applied to broadband curves (0 or 1 disables)
    pub smoothing_points: usize,
    /// Reference frequency (Hz)
    pub calf: f64,
    /// Reference intensity (dB SPL)
    pub caldb: f64,
    /// Reference output voltage (V)
    pub calv: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            point_measure: PointMeasure::FftPeak,
            smoothing_points: 0,
            calf: 20_000.0,
            caldb: 100.0,
            calv: 0.1,
        }
    }
}

/// Acquisition run defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Input (recording) sample rate in Hz
    pub input_rate: f64,
    /// Recording window in seconds
    pub window: f64,
    pub output_channel: String,
    pub input_channel: String,
    pub repetitions: usize,
    /// Minimum time between presentation starts, in seconds
    pub interval: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            input_rate: 50_000.0,
            window: 0.2,
            output_channel: "ao0".to_string(),
            input_channel: "ai0".to_string(),
            repetitions: 1,
            interval: 0.0,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or the defaults if the file is missing or
    /// cannot be parsed. Missing sections and fields fall back individually.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}

// Calibration module - attenuation-vs-frequency curves
//
// Two ways of measuring the speaker/microphone transfer function:
// 1. Broadband: one sweep or noise stimulus, spectrum of the averaged
//    response divided by the spectrum of what was played
// 2. Tone curve: a grid of pure tones, each reduced to a single peak value
//    and compared with the peak measured at the reference tone
//
// Both produce a CalibrationRecord anchored on (calf, caldb, calv).

pub mod broadband;
pub mod record;
pub mod tone_curve;

pub use broadband::{
    average_responses, compute_broadband, CalibrationDataset, CALIBRATION_CURVE_DATASET,
    CALIBRATION_GROUP_PREFIX,
};
pub use record::{CalibrationRecord, CalibrationReference, CurveMode};
pub use tone_curve::{AveragedPoint, ToneCurveDataset, ToneMeasurement};

use crate::analysis::SpectrumAnalyzer;
use crate::config::{CalibrationConfig, PointMeasure};
use crate::error::{log_calibration_error, CalibrationError};

/// Inputs of one calibration computation
pub enum CalibrationInput<'a> {
    Broadband {
        stimulus: &'a [f64],
        stimulus_rate: f64,
        responses: &'a [Vec<f64>],
        response_rate: f64,
        /// Stimulus band in Hz
        frange: (f64, f64),
    },
    ToneCurve(&'a ToneCurveDataset),
}

/// Converts captured responses into calibration records
///
/// The point measure and smoothing width are fixed at construction.
pub struct CalibrationProcessor {
    measure: PointMeasure,
    smoothing_points: usize,
    analyzer: SpectrumAnalyzer,
}

impl CalibrationProcessor {
    pub fn new(measure: PointMeasure, smoothing_points: usize) -> Self {
        Self {
            measure,
            smoothing_points,
            analyzer: SpectrumAnalyzer::new(),
        }
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self::new(config.point_measure, config.smoothing_points)
    }

    pub fn measure(&self) -> PointMeasure {
        self.measure
    }

    pub fn analyzer(&self) -> &SpectrumAnalyzer {
        &self.analyzer
    }

    /// Empty tone-curve dataset using this processor's point measure
    pub fn tone_curve_dataset(
        &self,
        reference: CalibrationReference,
        repetitions: usize,
    ) -> ToneCurveDataset {
        ToneCurveDataset::new(reference, self.measure, repetitions)
    }

    /// Compute a calibration record
    ///
    /// # Errors
    /// - `InsufficientData` for empty responses, a band above Nyquist or a
    ///   missing reference tone
    /// - `ReferenceMismatch` when a tone-curve dataset was collected against
    ///   a different reference than `reference`
    /// - `InvalidRecord` if the resulting table breaks record invariants
    pub fn compute(
        &self,
        input: CalibrationInput<'_>,
        reference: CalibrationReference,
    ) -> Result<CalibrationRecord, CalibrationError> {
        let result = match input {
            CalibrationInput::Broadband {
                stimulus,
                stimulus_rate,
                responses,
                response_rate,
                frange,
            } => average_responses(responses).and_then(|avg| {
                compute_broadband(
                    &self.analyzer,
                    stimulus,
                    stimulus_rate,
                    &avg,
                    response_rate,
                    frange,
                    reference,
                    self.smoothing_points,
                )
            }),
            CalibrationInput::ToneCurve(dataset) if dataset.reference() != reference => {
                Err(CalibrationError::ReferenceMismatch {
                    reason: format!(
                        "tones were measured against {:?}, not {:?}",
                        dataset.reference(),
                        reference
                    ),
                })
            }
            CalibrationInput::ToneCurve(dataset) => dataset.compute(),
        };

        match &result {
            Ok(record) => tracing::info!(
                "[Calibration] Computed {:?} curve with {} points, reference attenuation {:.2} dB",
                record.mode(),
                record.frequencies().len(),
                record.reference_attenuation()
            ),
            Err(err) => log_calibration_error(err, "compute"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CalibrationErrorCodes, ErrorCode};

    #[test]
    fn test_compute_broadband_averages_responses() {
        let processor = CalibrationProcessor::new(PointMeasure::FftPeak, 0);
        let rate = 1024.0;
        let stimulus: Vec<f64> = (0..1024)
            .map(|n| (2.0 * std::f64::consts::PI * 100.0 * n as f64 / rate).sin())
            .collect();
        // two responses averaging to stimulus / 2
        let responses = vec![
            stimulus.iter().map(|s| s * 0.25).collect::<Vec<_>>(),
            stimulus.iter().map(|s| s * 0.75).collect::<Vec<_>>(),
        ];

        let record = processor
            .compute(
                CalibrationInput::Broadband {
                    stimulus: &stimulus,
                    stimulus_rate: rate,
                    responses: &responses,
                    response_rate: rate,
                    frange: (90.0, 110.0),
                },
                CalibrationReference::new(100.0, 100.0, 0.1),
            )
            .unwrap();
        assert!((record.reference_attenuation() - 20.0 * 0.5f64.log10()).abs() < 1e-9);
    }

    #[test]
    fn test_compute_broadband_without_responses() {
        let processor = CalibrationProcessor::new(PointMeasure::FftPeak, 0);
        let err = processor
            .compute(
                CalibrationInput::Broadband {
                    stimulus: &[1.0, 0.0],
                    stimulus_rate: 1000.0,
                    responses: &[],
                    response_rate: 1000.0,
                    frange: (0.0, 500.0),
                },
                CalibrationReference::new(100.0, 100.0, 0.1),
            )
            .unwrap_err();
        assert!(matches!(err, CalibrationError::InsufficientData { .. }));
    }

    #[test]
    fn test_compute_tone_curve() {
        let processor = CalibrationProcessor::new(PointMeasure::Peak, 0);
        let reference = CalibrationReference::new(20_000.0, 80.0, 0.1);
        let mut dataset = processor.tone_curve_dataset(reference, 1);
        dataset.record(processor.analyzer(), 20_000.0, 80.0, 0, &[1.0], 1000.0);
        dataset.record(processor.analyzer(), 10_000.0, 80.0, 0, &[0.5], 1000.0);

        let record = processor
            .compute(CalibrationInput::ToneCurve(&dataset), reference)
            .unwrap();
        assert_eq!(record.frequencies(), &[10_000.0, 20_000.0]);
        assert!((record.attenuations()[0] - 6.0206).abs() < 1e-3);
    }

    #[test]
    fn test_tone_curve_with_other_reference() {
        let processor = CalibrationProcessor::new(PointMeasure::Peak, 0);
        let reference = CalibrationReference::new(20_000.0, 80.0, 0.1);
        let mut dataset = processor.tone_curve_dataset(reference, 1);
        dataset.record(processor.analyzer(), 20_000.0, 80.0, 0, &[1.0], 1000.0);

        let err = processor
            .compute(
                CalibrationInput::ToneCurve(&dataset),
                CalibrationReference::new(20_000.0, 100.0, 0.1),
            )
            .unwrap_err();
        assert_eq!(err.code(), CalibrationErrorCodes::REFERENCE_MISMATCH);
    }
}

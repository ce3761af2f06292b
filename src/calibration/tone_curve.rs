//! Tone-curve (point) calibration
//!
//! Pure tones are presented over a frequency x intensity grid. Each response
//! is reduced to one number by the configured [`PointMeasure`] and averaged
//! over repetitions. The presentation at (calf, caldb) supplies the reference
//! peak; every frequency presented at caldb then yields
//! `-20 log10(peak / calpeak)`.

use std::collections::BTreeMap;

use crate::analysis::{calc_db, peak, rms, Spectrum, SpectrumAnalyzer};
use crate::config::PointMeasure;
use crate::error::CalibrationError;

use super::record::{CalibrationRecord, CalibrationReference, CurveMode};

/// Reduction of one tone presentation
#[derive(Debug, Clone, PartialEq)]
pub struct ToneMeasurement {
    pub frequency: f64,
    pub intensity: f64,
    pub repetition: usize,
    pub spectrum: Spectrum,
    /// Value under the configured point measure
    pub peak: f64,
    /// RMS of the raw response
    pub vamp: f64,
}

/// Mean over all repetitions of one (frequency, intensity) presentation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AveragedPoint {
    pub frequency: f64,
    pub intensity: f64,
    pub mean_peak: f64,
    /// Estimated level: `caldb + 20 log10(mean_peak / calpeak)` once the
    /// reference is known, otherwise `20 log10(mean_peak)`
    pub result_db: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PointKey {
    frequency: u64,
    intensity: u64,
}

impl PointKey {
    fn new(frequency: f64, intensity: f64) -> Self {
        Self {
            frequency: frequency.to_bits(),
            intensity: intensity.to_bits(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct PointAccumulator {
    sum: f64,
    count: usize,
}

/// Collected tone-curve measurements
#[derive(Debug)]
pub struct ToneCurveDataset {
    reference: CalibrationReference,
    measure: PointMeasure,
    repetitions: usize,
    pending: BTreeMap<PointKey, PointAccumulator>,
    points: Vec<AveragedPoint>,
    calpeak: Option<f64>,
}

impl ToneCurveDataset {
    pub fn new(reference: CalibrationReference, measure: PointMeasure, repetitions: usize) -> Self {
        Self {
            reference,
            measure,
            repetitions: repetitions.max(1),
            pending: BTreeMap::new(),
            points: Vec::new(),
            calpeak: None,
        }
    }

    pub fn reference(&self) -> CalibrationReference {
        self.reference
    }

    pub fn calpeak(&self) -> Option<f64> {
        self.calpeak
    }

    pub fn points(&self) -> &[AveragedPoint] {
        &self.points
    }

    /// Reduce one response and fold it into its presentation's average
    ///
    /// Returns the measurement, plus the averaged point once the final
    /// repetition of that presentation has been folded in.
    pub fn record(
        &mut self,
        analyzer: &SpectrumAnalyzer,
        frequency: f64,
        intensity: f64,
        repetition: usize,
        response: &[f64],
        response_rate: f64,
    ) -> (ToneMeasurement, Option<AveragedPoint>) {
        let spectrum = analyzer.calc_spectrum(response, response_rate);
        let vamp = rms(response);
        let value = match self.measure {
            PointMeasure::FftPeak => spectrum.magnitude_at(frequency).unwrap_or(0.0),
            PointMeasure::Rms => vamp,
            PointMeasure::Peak => peak(response),
        };

        let key = PointKey::new(frequency, intensity);
        let acc = self.pending.entry(key).or_default();
        acc.sum += value;
        acc.count += 1;

        let averaged = if acc.count >= self.repetitions {
            let mean_peak = acc.sum / acc.count as f64;
            self.pending.remove(&key);
            Some(self.finish_point(frequency, intensity, mean_peak))
        } else {
            None
        };

        let measurement = ToneMeasurement {
            frequency,
            intensity,
            repetition,
            spectrum,
            peak: value,
            vamp,
        };
        (measurement, averaged)
    }

    fn finish_point(&mut self, frequency: f64, intensity: f64, mean_peak: f64) -> AveragedPoint {
        if frequency == self.reference.calf && intensity == self.reference.caldb {
            self.calpeak = Some(mean_peak);
            tracing::debug!("[ToneCurve] Reference peak {:.6}", mean_peak);
        }
        let result_db = match self.calpeak {
            Some(calpeak) => self.reference.caldb + calc_db(mean_peak, calpeak),
            None => calc_db(mean_peak, 1.0),
        };
        let point = AveragedPoint {
            frequency,
            intensity,
            mean_peak,
            result_db,
        };
        self.points
            .retain(|p| !(p.frequency == frequency && p.intensity == intensity));
        self.points.push(point);
        point
    }

    /// Attenuation vector from every frequency presented at caldb
    ///
    /// # Errors
    /// `InsufficientData` when the (calf, caldb) presentation never completed.
    pub fn compute(&self) -> Result<CalibrationRecord, CalibrationError> {
        let calpeak = self.calpeak.ok_or_else(|| CalibrationError::InsufficientData {
            reason: format!(
                "no completed presentation at calibration frequency {} Hz, {} dB",
                self.reference.calf, self.reference.caldb
            ),
        })?;

        let mut curve: Vec<(f64, f64)> = self
            .points
            .iter()
            .filter(|p| p.intensity == self.reference.caldb)
            .map(|p| (p.frequency, -calc_db(p.mean_peak, calpeak)))
            .collect();
        curve.sort_by(|a, b| a.0.total_cmp(&b.0));

        let frange = (
            curve.first().map(|c| c.0).unwrap_or(self.reference.calf),
            curve.last().map(|c| c.0).unwrap_or(self.reference.calf),
        );
        let (frequencies, attenuations): (Vec<f64>, Vec<f64>) = curve.into_iter().unzip();

        CalibrationRecord::new(
            CurveMode::ToneCurve,
            attenuations,
            frequencies,
            frange,
            self.reference,
        )
    }
}

//! Calibration record
//!
//! A frequency/attenuation table anchored on a reference triple (calf, caldb,
//! calv). Records are plain values; every component that applies one keeps
//! its own clone.

use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Which pipeline produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveMode {
    /// Values are the raw transfer `20 log10(|Y| / |X|)` of the system
    Broadband,
    /// Values are `-20 log10(peak / calpeak)`, already relative to calf
    ToneCurve,
}

/// Calibration reference triple
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReference {
    /// Reference frequency (Hz)
    pub calf: f64,
    /// Reference intensity (dB SPL)
    pub caldb: f64,
    /// Reference voltage (V)
    pub calv: f64,
}

impl CalibrationReference {
    pub fn new(calf: f64, caldb: f64, calv: f64) -> Self {
        Self { calf, caldb, calv }
    }
}

/// Attenuation-vs-frequency table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    mode: CurveMode,
    attenuations: Vec<f64>,
    frequencies: Vec<f64>,
    frange: (f64, f64),
    reference: CalibrationReference,
}

impl CalibrationRecord {
    /// Build a record, enforcing its structural invariants
    ///
    /// # Errors
    /// `InvalidRecord` when the vectors are empty, differ in length, contain
    /// non-finite values, or the frequencies are not strictly increasing.
    pub fn new(
        mode: CurveMode,
        attenuations: Vec<f64>,
        frequencies: Vec<f64>,
        frange: (f64, f64),
        reference: CalibrationReference,
    ) -> Result<Self, CalibrationError> {
        if attenuations.len() != frequencies.len() {
            return Err(CalibrationError::InvalidRecord {
                reason: format!(
                    "{} attenuations for {} frequencies",
                    attenuations.len(),
                    frequencies.len()
                ),
            });
        }
        if frequencies.is_empty() {
            return Err(CalibrationError::InvalidRecord {
                reason: "empty frequency vector".to_string(),
            });
        }
        if frequencies.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(CalibrationError::InvalidRecord {
                reason: "frequencies must be strictly increasing".to_string(),
            });
        }
        if attenuations
            .iter()
            .chain(frequencies.iter())
            .any(|v| !v.is_finite())
        {
            return Err(CalibrationError::InvalidRecord {
                reason: "non-finite value".to_string(),
            });
        }
        if frange.0 > frange.1 {
            return Err(CalibrationError::InvalidRecord {
                reason: format!("inverted frequency range [{}, {}]", frange.0, frange.1),
            });
        }

        Ok(Self {
            mode,
            attenuations,
            frequencies,
            frange,
            reference,
        })
    }

    pub fn mode(&self) -> CurveMode {
        self.mode
    }

    pub fn attenuations(&self) -> &[f64] {
        &self.attenuations
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn frange(&self) -> (f64, f64) {
        self.frange
    }

    pub fn reference(&self) -> CalibrationReference {
        self.reference
    }

    pub fn calf(&self) -> f64 {
        self.reference.calf
    }

    pub fn caldb(&self) -> f64 {
        self.reference.caldb
    }

    pub fn calv(&self) -> f64 {
        self.reference.calv
    }

    /// Index of the entry nearest `frequency` (ties go to the lower entry)
    pub fn nearest_index(&self, frequency: f64) -> usize {
        match self
            .frequencies
            .binary_search_by(|f| f.total_cmp(&frequency))
        {
            Ok(ix) => ix,
            Err(0) => 0,
            Err(ix) if ix >= self.frequencies.len() => self.frequencies.len() - 1,
            Err(ix) => {
                if frequency - self.frequencies[ix - 1] <= self.frequencies[ix] - frequency {
                    ix - 1
                } else {
                    ix
                }
            }
        }
    }

    /// Value of the entry nearest `frequency`
    pub fn attenuation_at(&self, frequency: f64) -> f64 {
        self.attenuations[self.nearest_index(frequency)]
    }

    /// Value at the reference frequency
    pub fn reference_attenuation(&self) -> f64 {
        self.attenuation_at(self.reference.calf)
    }

    /// The curve shifted so that the reference frequency reads 0 dB
    pub fn relative_curve(&self) -> Vec<f64> {
        let offset = self.reference_attenuation();
        self.attenuations.iter().map(|a| a - offset).collect()
    }

    /// dB to add to the output at `frequency` so it lands at the requested level
    pub fn correction_at(&self, frequency: f64) -> f64 {
        let relative = self.attenuation_at(frequency) - self.reference_attenuation();
        match self.mode {
            CurveMode::Broadband => -relative,
            CurveMode::ToneCurve => relative,
        }
    }

    /// Ensure the reference frequency lies inside the calibrated range
    pub fn check_applicable(&self) -> Result<(), CalibrationError> {
        let calf = self.reference.calf;
        if calf < self.frange.0 || calf > self.frange.1 {
            return Err(CalibrationError::Mismatch {
                calf,
                frange: self.frange,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> CalibrationReference {
        CalibrationReference::new(20_000.0, 100.0, 0.1)
    }

    fn record(mode: CurveMode) -> CalibrationRecord {
        CalibrationRecord::new(
            mode,
            vec![-3.0, -1.0, 2.0, 5.0],
            vec![5_000.0, 10_000.0, 20_000.0, 40_000.0],
            (5_000.0, 40_000.0),
            reference(),
        )
        .unwrap()
    }

    #[test]
    fn test_invariants() {
        let err = CalibrationRecord::new(
            CurveMode::Broadband,
            vec![1.0],
            vec![1.0, 2.0],
            (1.0, 2.0),
            reference(),
        )
        .unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidRecord { .. }));

        let err = CalibrationRecord::new(
            CurveMode::Broadband,
            vec![1.0, 2.0],
            vec![2.0, 2.0],
            (1.0, 2.0),
            reference(),
        )
        .unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidRecord { .. }));
    }

    #[test]
    fn test_nearest_lookup() {
        let rec = record(CurveMode::Broadband);
        assert_eq!(rec.attenuation_at(0.0), -3.0);
        assert_eq!(rec.attenuation_at(7_400.0), -3.0);
        assert_eq!(rec.attenuation_at(7_600.0), -1.0);
        assert_eq!(rec.attenuation_at(20_000.0), 2.0);
        assert_eq!(rec.attenuation_at(1e9), 5.0);
    }

    #[test]
    fn test_relative_curve() {
        let rec = record(CurveMode::Broadband);
        assert_eq!(rec.reference_attenuation(), 2.0);
        assert_eq!(rec.relative_curve(), vec![-5.0, -3.0, 0.0, 3.0]);
    }

    #[test]
    fn test_correction_sign() {
        // weaker response at 5 kHz needs more output in both modes
        let broadband = record(CurveMode::Broadband);
        assert_eq!(broadband.correction_at(5_000.0), 5.0);

        let tone = CalibrationRecord::new(
            CurveMode::ToneCurve,
            vec![6.0, 0.0],
            vec![5_000.0, 20_000.0],
            (5_000.0, 20_000.0),
            reference(),
        )
        .unwrap();
        assert_eq!(tone.correction_at(5_000.0), 6.0);
        assert_eq!(tone.correction_at(20_000.0), 0.0);
    }

    #[test]
    fn test_check_applicable() {
        let rec = record(CurveMode::Broadband);
        assert!(rec.check_applicable().is_ok());

        let narrow = CalibrationRecord::new(
            CurveMode::Broadband,
            vec![0.0, 0.0],
            vec![5_000.0, 10_000.0],
            (5_000.0, 10_000.0),
            reference(),
        )
        .unwrap();
        assert_eq!(
            narrow.check_applicable(),
            Err(CalibrationError::Mismatch {
                calf: 20_000.0,
                frange: (5_000.0, 10_000.0)
            })
        );
    }
}

// Calibration error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Calibration error code constants
///
/// Error code range: 2001-2006
pub struct CalibrationErrorCodes {}

impl CalibrationErrorCodes {
    /// Calibration requested before the required trials exist
    pub const INSUFFICIENT_DATA: i32 = 2001;

    /// Calibration record does not cover the reference frequency
    pub const MISMATCH: i32 = 2002;

    /// Calibration record violates its structural invariants
    pub const INVALID_RECORD: i32 = 2003;

    /// Calibration dataset lock was poisoned
    pub const STATE_POISONED: i32 = 2004;

    /// Durable store rejected the calibration output
    pub const PERSISTENCE_FAILED: i32 = 2005;

    /// Measurements were taken against another reference triple
    pub const REFERENCE_MISMATCH: i32 = 2006;
}

/// Log a calibration error with structured context
///
/// This function logs calibration errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - component: The component where the error occurred
/// - message: Human-readable error message
/// - context: Additional contextual information
pub fn log_calibration_error(err: &CalibrationError, context: &str) {
    error!(
        "Calibration error in {}: code={}, component=CalibrationProcessor, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Calibration-related errors
///
/// These errors cover calibration curve computation, record validation and
/// the save/discard lifecycle of calibration datasets.
///
/// Error code ranges: 2001-2006
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Reference presentation never happened, or responses are empty
    InsufficientData { reason: String },

    /// Reference frequency lies outside the record's frequency range
    Mismatch { calf: f64, frange: (f64, f64) },

    /// Attenuation/frequency vectors are inconsistent
    InvalidRecord { reason: String },

    /// Calibration dataset lock was poisoned
    StatePoisoned,

    /// Writing to or deleting from the durable store failed
    PersistenceFailed { details: String },

    /// Requested reference differs from the one the data was measured against
    ReferenceMismatch { reason: String },
}

impl ErrorCode for CalibrationError {
    fn code(&self) -> i32 {
        match self {
            CalibrationError::InsufficientData { .. } => CalibrationErrorCodes::INSUFFICIENT_DATA,
            CalibrationError::Mismatch { .. } => CalibrationErrorCodes::MISMATCH,
            CalibrationError::InvalidRecord { .. } => CalibrationErrorCodes::INVALID_RECORD,
            CalibrationError::StatePoisoned => CalibrationErrorCodes::STATE_POISONED,
            CalibrationError::PersistenceFailed { .. } => {
                CalibrationErrorCodes::PERSISTENCE_FAILED
            }
            CalibrationError::ReferenceMismatch { .. } => {
                CalibrationErrorCodes::REFERENCE_MISMATCH
            }
        }
    }

    fn message(&self) -> String {
        match self {
            CalibrationError::InsufficientData { reason } => {
                format!("Insufficient calibration data: {}", reason)
            }
            CalibrationError::Mismatch { calf, frange } => format!(
                "Calibration frequency {} Hz outside calibrated range [{}, {}]",
                calf, frange.0, frange.1
            ),
            CalibrationError::InvalidRecord { reason } => {
                format!("Invalid calibration record: {}", reason)
            }
            CalibrationError::StatePoisoned => "Calibration dataset lock poisoned".to_string(),
            CalibrationError::PersistenceFailed { details } => {
                format!("Failed to persist calibration: {}", details)
            }
            CalibrationError::ReferenceMismatch { reason } => {
                format!("Calibration reference mismatch: {}", reason)
            }
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CalibrationError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CalibrationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_error_codes() {
        assert_eq!(
            CalibrationError::InsufficientData {
                reason: "test".to_string()
            }
            .code(),
            CalibrationErrorCodes::INSUFFICIENT_DATA
        );
        assert_eq!(
            CalibrationError::Mismatch {
                calf: 1.0,
                frange: (2.0, 3.0)
            }
            .code(),
            CalibrationErrorCodes::MISMATCH
        );
        assert_eq!(CalibrationError::StatePoisoned.code(), 2004);
    }

    #[test]
    fn test_calibration_error_messages() {
        let err = CalibrationError::Mismatch {
            calf: 20000.0,
            frange: (5000.0, 10000.0),
        };
        assert_eq!(
            err.message(),
            "Calibration frequency 20000 Hz outside calibrated range [5000, 10000]"
        );

        let err = CalibrationError::InsufficientData {
            reason: "no reference tone".to_string(),
        };
        assert!(err.message().contains("no reference tone"));
    }
}

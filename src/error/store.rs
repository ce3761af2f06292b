// Response store error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Response store error code constants
///
/// Error code range: 3001-3008
pub struct StoreErrorCodes {}

impl StoreErrorCodes {
    pub const INDEX_NOT_FOUND: i32 = 3001;
    pub const UNSUPPORTED_SHAPE: i32 = 3002;
    pub const UNKNOWN_DATASET: i32 = 3003;
    pub const SHAPE_MISMATCH: i32 = 3004;
    pub const REPETITION_OUT_OF_RANGE: i32 = 3005;
    pub const LOCK_POISONED: i32 = 3006;
    pub const EXPORT_FAILED: i32 = 3007;
    pub const UNSUPPORTED_FORMAT: i32 = 3008;
}

/// Log a store error with structured context
pub fn log_store_error(err: &StoreError, context: &str) {
    error!(
        "Store error in {}: code={}, component=ResponseStore, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised by the indexed response store and durable stores
///
/// `IndexNotFound` and `UnsupportedShape` signal a mismatch between the
/// declared axes and the requested keys. They are never retried.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Value not present on the frequency or intensity axis
    IndexNotFound { axis: &'static str, value: f64 },

    /// Dataset rank other than 2, 3 or 4
    UnsupportedShape { rank: usize },

    /// No dataset registered under this key
    UnknownDataset { key: String },

    /// Data length does not match the dataset cell size
    ShapeMismatch { expected: usize, found: usize },

    /// Repetition index beyond the configured repetitions
    RepetitionOutOfRange { rep: usize, repetitions: usize },

    /// Store mutex was poisoned by a panicking writer
    LockPoisoned,

    /// Snapshot could not be written or read
    ExportFailed { details: String },

    /// Export format not supported
    UnsupportedFormat { format: String },
}

impl ErrorCode for StoreError {
    fn code(&self) -> i32 {
        match self {
            StoreError::IndexNotFound { .. } => StoreErrorCodes::INDEX_NOT_FOUND,
            StoreError::UnsupportedShape { .. } => StoreErrorCodes::UNSUPPORTED_SHAPE,
            StoreError::UnknownDataset { .. } => StoreErrorCodes::UNKNOWN_DATASET,
            StoreError::ShapeMismatch { .. } => StoreErrorCodes::SHAPE_MISMATCH,
            StoreError::RepetitionOutOfRange { .. } => StoreErrorCodes::REPETITION_OUT_OF_RANGE,
            StoreError::LockPoisoned => StoreErrorCodes::LOCK_POISONED,
            StoreError::ExportFailed { .. } => StoreErrorCodes::EXPORT_FAILED,
            StoreError::UnsupportedFormat { .. } => StoreErrorCodes::UNSUPPORTED_FORMAT,
        }
    }

    fn message(&self) -> String {
        match self {
            StoreError::IndexNotFound { axis, value } => {
                format!("Value {} not found on {} axis", value, axis)
            }
            StoreError::UnsupportedShape { rank } => {
                format!("number of dimensions, {}, currently not supported", rank)
            }
            StoreError::UnknownDataset { key } => format!("No dataset named '{}'", key),
            StoreError::ShapeMismatch { expected, found } => {
                format!("Expected {} values, got {}", expected, found)
            }
            StoreError::RepetitionOutOfRange { rep, repetitions } => format!(
                "Repetition {} out of range for {} repetitions",
                rep, repetitions
            ),
            StoreError::LockPoisoned => "Response store lock poisoned".to_string(),
            StoreError::ExportFailed { details } => format!("Export failed: {}", details),
            StoreError::UnsupportedFormat { format } => {
                format!("Unsupported export format: {}", format)
            }
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StoreError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::ExportFailed {
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::ExportFailed {
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_codes() {
        assert_eq!(
            StoreError::IndexNotFound {
                axis: "frequency",
                value: 1.0
            }
            .code(),
            3001
        );
        assert_eq!(StoreError::UnsupportedShape { rank: 5 }.code(), 3002);
        assert_eq!(StoreError::LockPoisoned.code(), 3006);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let store_err: StoreError = io_err.into();

        match store_err {
            StoreError::ExportFailed { details } => assert!(details.contains("missing file")),
            other => panic!("Expected ExportFailed variant, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_shape_message() {
        let err = StoreError::UnsupportedShape { rank: 1 };
        assert!(err.message().contains("1"));
        assert!(err.message().contains("not supported"));
    }
}

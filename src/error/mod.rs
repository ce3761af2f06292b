// Error types for the acquisition engine
//
// This module defines one error enum per component (synthesis, calibration,
// response store, acquisition runs), each carrying a stable numeric code so
// that warning events and exported logs can be matched programmatically.

mod acquisition;
mod calibration;
mod stimulus;
mod store;

pub use acquisition::{log_acquisition_error, AcquisitionError, AcquisitionErrorCodes};
pub use calibration::{log_calibration_error, CalibrationError, CalibrationErrorCodes};
pub use stimulus::{log_stimulus_error, StimulusError, StimulusErrorCodes};
pub use store::{log_store_error, StoreError, StoreErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the notification channels.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

// Acquisition run error types and constants

use crate::error::{CalibrationError, ErrorCode, StimulusError, StoreError};
use log::error;
use std::fmt;

/// Acquisition error code constants
///
/// Error code range: 4001-4006
pub struct AcquisitionErrorCodes {}

impl AcquisitionErrorCodes {
    /// Bad or missing run parameters
    pub const CONFIGURATION: i32 = 4001;

    /// Play/record collaborator failure
    pub const HARDWARE_ERROR: i32 = 4002;

    /// A run is already in progress
    pub const ALREADY_RUNNING: i32 = 4003;

    /// `run()` called before `setup()`
    pub const NOT_CONFIGURED: i32 = 4004;

    /// Run state lock was poisoned
    pub const LOCK_POISONED: i32 = 4005;

    /// Run thread panicked
    pub const RUN_PANICKED: i32 = 4006;
}

/// Log an acquisition error with structured context
pub fn log_acquisition_error(err: &AcquisitionError, context: &str) {
    error!(
        "Acquisition error in {}: code={}, component=Coordinator, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Acquisition-related errors
///
/// Store and calibration failures surfaced by a run are wrapped so that the
/// caller receives them unchanged from `RunHandle::join`.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    /// Run parameters are missing or invalid; the run never starts
    Configuration { reason: String },

    /// Play/record collaborator failure; `fatal` when the device is gone
    Hardware { details: String, fatal: bool },

    /// A run is already in progress
    AlreadyRunning,

    /// `run()` called before a successful `setup()`
    NotConfigured,

    /// Mutex was poisoned
    LockPoisoned { component: String },

    /// Run thread panicked before reporting
    RunPanicked,

    /// Store indexing error propagated out of a run
    Store(StoreError),

    /// Calibration error propagated out of a run
    Calibration(CalibrationError),

    /// Synthesis error surfaced outside a presentation
    Stimulus(StimulusError),
}

impl AcquisitionError {
    /// Whether the error terminates the current run
    pub fn is_fatal(&self) -> bool {
        match self {
            AcquisitionError::Hardware { fatal, .. } => *fatal,
            AcquisitionError::Stimulus(_) => false,
            _ => true,
        }
    }
}

impl ErrorCode for AcquisitionError {
    fn code(&self) -> i32 {
        match self {
            AcquisitionError::Configuration { .. } => AcquisitionErrorCodes::CONFIGURATION,
            AcquisitionError::Hardware { .. } => AcquisitionErrorCodes::HARDWARE_ERROR,
            AcquisitionError::AlreadyRunning => AcquisitionErrorCodes::ALREADY_RUNNING,
            AcquisitionError::NotConfigured => AcquisitionErrorCodes::NOT_CONFIGURED,
            AcquisitionError::LockPoisoned { .. } => AcquisitionErrorCodes::LOCK_POISONED,
            AcquisitionError::RunPanicked => AcquisitionErrorCodes::RUN_PANICKED,
            AcquisitionError::Store(err) => err.code(),
            AcquisitionError::Calibration(err) => err.code(),
            AcquisitionError::Stimulus(err) => err.code(),
        }
    }

    fn message(&self) -> String {
        match self {
            AcquisitionError::Configuration { reason } => {
                format!("Invalid run configuration: {}", reason)
            }
            AcquisitionError::Hardware { details, fatal } => {
                if *fatal {
                    format!("Fatal hardware error: {}", details)
                } else {
                    format!("Hardware error: {}", details)
                }
            }
            AcquisitionError::AlreadyRunning => {
                "Acquisition already running. Call halt() and join first.".to_string()
            }
            AcquisitionError::NotConfigured => {
                "Acquisition not configured. Call setup() first.".to_string()
            }
            AcquisitionError::LockPoisoned { component } => {
                format!("Lock poisoned for component: {}", component)
            }
            AcquisitionError::RunPanicked => "Acquisition thread panicked".to_string(),
            AcquisitionError::Store(err) => err.message(),
            AcquisitionError::Calibration(err) => err.message(),
            AcquisitionError::Stimulus(err) => err.message(),
        }
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AcquisitionError (code {}): {}",
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AcquisitionError {}

impl From<StoreError> for AcquisitionError {
    fn from(err: StoreError) -> Self {
        AcquisitionError::Store(err)
    }
}

impl From<CalibrationError> for AcquisitionError {
    fn from(err: CalibrationError) -> Self {
        AcquisitionError::Calibration(err)
    }
}

impl From<StimulusError> for AcquisitionError {
    fn from(err: StimulusError) -> Self {
        AcquisitionError::Stimulus(err)
    }
}

impl From<std::io::Error> for AcquisitionError {
    fn from(err: std::io::Error) -> Self {
        AcquisitionError::Hardware {
            details: err.to_string(),
            fatal: false,
        }
    }
}

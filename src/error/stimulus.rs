// Stimulus synthesis error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Stimulus error code constants
///
/// Error code range: 1001-1008
pub struct StimulusErrorCodes {}

impl StimulusErrorCodes {
    /// Intensity scaling requested without a calibration reference
    pub const CALIBRATION_MISSING: i32 = 1001;

    /// Stimulus frequency above the Nyquist limit of the generation rate
    pub const INVALID_SAMPLE_RATE: i32 = 1002;

    /// Vocalization has no source file assigned
    pub const SOURCE_MISSING: i32 = 1003;

    /// Vocalization source could not be read
    pub const SOURCE_UNREADABLE: i32 = 1004;

    /// Source waveform rate differs from the requested generation rate
    pub const SAMPLE_RATE_MISMATCH: i32 = 1005;

    /// Requested duration exceeds the pre-drawn noise sequence
    pub const DURATION_TOO_LONG: i32 = 1006;

    /// A component parameter is out of range
    pub const INVALID_PARAMETER: i32 = 1007;

    /// Stimulus document could not be decoded
    pub const INVALID_STATE: i32 = 1008;
}

/// Log a stimulus error with structured context
pub fn log_stimulus_error(err: &StimulusError, context: &str) {
    error!(
        "Stimulus error in {}: code={}, component=Synthesizer, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised while generating stimulus signals
#[derive(Debug, Clone, PartialEq)]
pub enum StimulusError {
    /// Calibration reference dB/voltage missing for an intensity-scaled kind
    CalibrationMissing,

    /// Frequency exceeds half the generation sample rate
    InvalidSampleRate { frequency: f64, sample_rate: f64 },

    /// Vocalization without a file
    SourceMissing,

    /// Vocalization file could not be read or decoded
    SourceUnreadable { path: String, reason: String },

    /// Source waveform sample rate does not match the generation rate
    SampleRateMismatch { expected: f64, found: f64 },

    /// Noise request longer than the shared sequence
    DurationTooLong { requested: usize, available: usize },

    /// Parameter out of range (negative duration, non-positive rate, ...)
    InvalidParameter { name: String, value: f64 },

    /// Stimulus document could not be decoded
    InvalidState { reason: String },
}

impl ErrorCode for StimulusError {
    fn code(&self) -> i32 {
        match self {
            StimulusError::CalibrationMissing => StimulusErrorCodes::CALIBRATION_MISSING,
            StimulusError::InvalidSampleRate { .. } => StimulusErrorCodes::INVALID_SAMPLE_RATE,
            StimulusError::SourceMissing => StimulusErrorCodes::SOURCE_MISSING,
            StimulusError::SourceUnreadable { .. } => StimulusErrorCodes::SOURCE_UNREADABLE,
            StimulusError::SampleRateMismatch { .. } => StimulusErrorCodes::SAMPLE_RATE_MISMATCH,
            StimulusError::DurationTooLong { .. } => StimulusErrorCodes::DURATION_TOO_LONG,
            StimulusError::InvalidParameter { .. } => StimulusErrorCodes::INVALID_PARAMETER,
            StimulusError::InvalidState { .. } => StimulusErrorCodes::INVALID_STATE,
        }
    }

    fn message(&self) -> String {
        match self {
            StimulusError::CalibrationMissing => {
                "Intensity scaling requires calibration reference dB and voltage".to_string()
            }
            StimulusError::InvalidSampleRate {
                frequency,
                sample_rate,
            } => format!(
                "Generation sample rate must be at least twice the stimulus frequency ({} Hz at {} Hz)",
                frequency, sample_rate
            ),
            StimulusError::SourceMissing => "Vocalization stimulus without a specified file".to_string(),
            StimulusError::SourceUnreadable { path, reason } => {
                format!("Unable to read waveform {}: {}", path, reason)
            }
            StimulusError::SampleRateMismatch { expected, found } => format!(
                "Specified samplerate {} does not match wav stimulus samplerate {}",
                expected, found
            ),
            StimulusError::DurationTooLong {
                requested,
                available,
            } => format!(
                "Noise request of {} samples exceeds the {} pre-drawn samples",
                requested, available
            ),
            StimulusError::InvalidParameter { name, value } => {
                format!("Invalid value for {}: {}", name, value)
            }
            StimulusError::InvalidState { reason } => {
                format!("Invalid stimulus document: {}", reason)
            }
        }
    }
}

impl fmt::Display for StimulusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StimulusError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for StimulusError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stimulus_error_codes() {
        assert_eq!(
            StimulusError::CalibrationMissing.code(),
            StimulusErrorCodes::CALIBRATION_MISSING
        );
        assert_eq!(
            StimulusError::InvalidSampleRate {
                frequency: 30000.0,
                sample_rate: 44100.0
            }
            .code(),
            StimulusErrorCodes::INVALID_SAMPLE_RATE
        );
        assert_eq!(StimulusError::SourceMissing.code(), 1003);
        assert_eq!(
            StimulusError::DurationTooLong {
                requested: 10,
                available: 5
            }
            .code(),
            1006
        );
    }

    #[test]
    fn test_stimulus_error_messages() {
        let err = StimulusError::InvalidSampleRate {
            frequency: 30000.0,
            sample_rate: 44100.0,
        };
        assert!(err.message().contains("twice the stimulus frequency"));

        let err = StimulusError::SampleRateMismatch {
            expected: 44100.0,
            found: 48000.0,
        };
        assert!(err.message().contains("48000"));

        let display = format!("{}", StimulusError::CalibrationMissing);
        assert!(display.contains("StimulusError"));
        assert!(display.contains("1001"));
    }
}

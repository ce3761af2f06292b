// Auditory Acquisition Core - calibrated stimulus playback and response capture
// Synthesis, calibration curves, indexed response storage and run coordination

// Module declarations
pub mod acquisition;
pub mod analysis;
pub mod calibration;
pub mod config;
pub mod device;
pub mod error;
pub mod managers;
pub mod stimulus;
pub mod store;

// Re-exports for convenience
pub use acquisition::{AcquisitionCoordinator, RunHandle, RunOutcome, RunReport, RunState};
pub use calibration::{CalibrationProcessor, CalibrationRecord, CalibrationReference};
pub use config::AppConfig;
pub use managers::{AcquisitionEvent, ChannelName, NotificationHub};
pub use stimulus::{StimulusComponent, StimulusKind, Synthesizer};
pub use store::ResponseStore;

/// Install the fmt subscriber for `tracing` output
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().try_init();
}

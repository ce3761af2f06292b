//! Play/record abstraction for the acquisition core.

use crate::error::AcquisitionError;

/// Trait implemented by play/record collaborators.
///
/// One call plays a whole stimulus buffer on the output channel while the
/// input channel is sampled for the configured window. Implementations are
/// moved into the run thread for the duration of a run.
pub trait PlayRecord: Send {
    /// Select the output and input channels used by later calls
    fn configure(&mut self, output_channel: &str, input_channel: &str)
        -> Result<(), AcquisitionError>;

    /// Play `buffer` generated at `sample_rate` and return the recorded response
    ///
    /// Failures are reported as `AcquisitionError::Hardware`; `fatal` is set
    /// when the device is gone and cannot be recovered by `reconnect`.
    fn play_and_record(
        &mut self,
        buffer: &[f64],
        sample_rate: f64,
    ) -> Result<Vec<f64>, AcquisitionError>;

    fn is_connected(&self) -> bool;

    /// Re-open the device after a transient failure
    fn reconnect(&mut self) -> Result<(), AcquisitionError>;
}

mod loopback;
pub use loopback::{ConnectionHandle, Fault, LoopbackDevice};

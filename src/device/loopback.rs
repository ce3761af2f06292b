use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::AcquisitionConfig;
use crate::error::AcquisitionError;

use super::PlayRecord;

/// Failure injected into a numbered `play_and_record` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The call fails; the next one works again
    Transient,
    /// The device drops off and stays gone
    Disconnect,
}

/// Shared switch to unplug a [`LoopbackDevice`] from another thread
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    connected: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Loopback device used for deterministic testing and CLI tooling.
///
/// Simulates a speaker wired straight into a microphone: every response is
/// the played buffer times a fixed gain, resampled to the input rate by
/// nearest-sample lookup and cut to the recording window. Samples past the
/// end of the stimulus read as silence.
pub struct LoopbackDevice {
    connected: Arc<AtomicBool>,
    channels: Option<(String, String)>,
    gain: f64,
    input_rate: f64,
    window: f64,
    faults: BTreeMap<usize, Fault>,
    calls: usize,
}

impl LoopbackDevice {
    pub fn new(input_rate: f64, window: f64) -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(true)),
            channels: None,
            gain: 1.0,
            input_rate,
            window,
            faults: BTreeMap::new(),
            calls: 0,
        }
    }

    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self::new(config.input_rate, config.window)
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    /// Fail the `call`-th `play_and_record` (zero based)
    pub fn with_fault(mut self, call: usize, fault: Fault) -> Self {
        self.faults.insert(call, fault);
        self
    }

    pub fn connection(&self) -> ConnectionHandle {
        ConnectionHandle {
            connected: Arc::clone(&self.connected),
        }
    }

    /// Number of `play_and_record` calls so far, failed ones included
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn channels(&self) -> Option<(&str, &str)> {
        self.channels
            .as_ref()
            .map(|(out, input)| (out.as_str(), input.as_str()))
    }

    fn disconnected() -> AcquisitionError {
        AcquisitionError::Hardware {
            details: "loopback device disconnected".to_string(),
            fatal: true,
        }
    }
}

impl PlayRecord for LoopbackDevice {
    fn configure(
        &mut self,
        output_channel: &str,
        input_channel: &str,
    ) -> Result<(), AcquisitionError> {
        if output_channel.is_empty() || input_channel.is_empty() {
            return Err(AcquisitionError::Configuration {
                reason: "output and input channels must be named".to_string(),
            });
        }
        self.channels = Some((output_channel.to_string(), input_channel.to_string()));
        Ok(())
    }

    fn play_and_record(
        &mut self,
        buffer: &[f64],
        sample_rate: f64,
    ) -> Result<Vec<f64>, AcquisitionError> {
        let call = self.calls;
        self.calls += 1;

        if !self.is_connected() {
            return Err(Self::disconnected());
        }
        if self.channels.is_none() {
            return Err(AcquisitionError::Hardware {
                details: "channels not configured".to_string(),
                fatal: false,
            });
        }
        match self.faults.remove(&call) {
            Some(Fault::Transient) => {
                return Err(AcquisitionError::Hardware {
                    details: format!("transient failure on call {}", call),
                    fatal: false,
                })
            }
            Some(Fault::Disconnect) => {
                self.connected.store(false, Ordering::SeqCst);
                return Err(Self::disconnected());
            }
            None => {}
        }

        let npts = (self.window * self.input_rate).round() as usize;
        let response = (0..npts)
            .map(|k| {
                let t = k as f64 / self.input_rate;
                let src = (t * sample_rate).round() as usize;
                buffer.get(src).copied().unwrap_or(0.0) * self.gain
            })
            .collect();
        Ok(response)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn reconnect(&mut self) -> Result<(), AcquisitionError> {
        if self.is_connected() {
            tracing::debug!("[LoopbackDevice] Reconnected");
            Ok(())
        } else {
            Err(Self::disconnected())
        }
    }
}

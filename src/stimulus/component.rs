//! Stimulus component descriptors
//!
//! A component is a plain value: its kind with the kind's own parameters, plus
//! the duration, intensity and rise/fall time shared by every kind. It is
//! serialized as a flat tagged document so that stored traces can carry the
//! exact parameters they were recorded with.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StimulusError;

use super::source::WaveformSource;

/// Closed set of stimulus kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stim_type", rename_all = "snake_case")]
pub enum StimulusKind {
    PureTone {
        frequency: f64,
    },
    FmSweep {
        start_frequency: f64,
        stop_frequency: f64,
    },
    WhiteNoise,
    Vocalization {
        filename: Option<String>,
    },
    /// Raw-voltage square wave between 0 and `amplitude`
    SquareWave {
        frequency: f64,
        amplitude: f64,
    },
    Silence,
    Off,
}

/// One stimulus with its presentation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusComponent {
    #[serde(flatten)]
    pub kind: StimulusKind,
    /// Seconds
    pub duration: f64,
    /// dB SPL
    pub intensity: f64,
    /// Seconds of taper split across both edges
    pub risefall: f64,
}

impl StimulusComponent {
    pub fn new(kind: StimulusKind, duration: f64, intensity: f64, risefall: f64) -> Self {
        Self {
            kind,
            duration,
            intensity,
            risefall,
        }
    }

    pub fn pure_tone(frequency: f64, duration: f64, intensity: f64, risefall: f64) -> Self {
        Self::new(
            StimulusKind::PureTone { frequency },
            duration,
            intensity,
            risefall,
        )
    }

    pub fn fm_sweep(
        start_frequency: f64,
        stop_frequency: f64,
        duration: f64,
        intensity: f64,
        risefall: f64,
    ) -> Self {
        Self::new(
            StimulusKind::FmSweep {
                start_frequency,
                stop_frequency,
            },
            duration,
            intensity,
            risefall,
        )
    }

    pub fn white_noise(duration: f64, intensity: f64, risefall: f64) -> Self {
        Self::new(StimulusKind::WhiteNoise, duration, intensity, risefall)
    }

    /// Vocalization without a file; see [`StimulusComponent::set_file`]
    pub fn vocalization(intensity: f64, risefall: f64) -> Self {
        Self::new(
            StimulusKind::Vocalization { filename: None },
            0.0,
            intensity,
            risefall,
        )
    }

    pub fn square_wave(frequency: f64, amplitude: f64, duration: f64) -> Self {
        Self::new(
            StimulusKind::SquareWave {
                frequency,
                amplitude,
            },
            duration,
            0.0,
            0.0,
        )
    }

    pub fn silence(duration: f64) -> Self {
        Self::new(StimulusKind::Silence, duration, 0.0, 0.0)
    }

    pub fn off() -> Self {
        Self::new(StimulusKind::Off, 0.0, 0.0, 0.0)
    }

    /// Display name of the kind
    pub fn name(&self) -> &'static str {
        match self.kind {
            StimulusKind::PureTone { .. } => "Pure Tone",
            StimulusKind::FmSweep { .. } => "FM Sweep",
            StimulusKind::WhiteNoise => "White Noise",
            StimulusKind::Vocalization { .. } => "Vocalization",
            StimulusKind::SquareWave { .. } => "Square Wave",
            StimulusKind::Silence => "silence",
            StimulusKind::Off => "OFF",
        }
    }

    /// Frequency used to index this component on a frequency axis
    ///
    /// Tones and square waves use their frequency, sweeps their start
    /// frequency, every other kind 0.
    pub fn nominal_frequency(&self) -> f64 {
        match self.kind {
            StimulusKind::PureTone { frequency } => frequency,
            StimulusKind::SquareWave { frequency, .. } => frequency,
            StimulusKind::FmSweep {
                start_frequency, ..
            } => start_frequency,
            _ => 0.0,
        }
    }

    /// Whether synthesis scales this kind by the calibration reference
    pub fn requires_calibration(&self) -> bool {
        matches!(
            self.kind,
            StimulusKind::PureTone { .. }
                | StimulusKind::FmSweep { .. }
                | StimulusKind::WhiteNoise
                | StimulusKind::Vocalization { .. }
        )
    }

    /// Linear output amplitude for this component's intensity
    ///
    /// `calv * 10^((intensity + attenuation - caldb) / 20)`
    pub fn amplitude(
        &self,
        attenuation: f64,
        caldb: Option<f64>,
        calv: Option<f64>,
    ) -> Result<f64, StimulusError> {
        match (caldb, calv) {
            (Some(caldb), Some(calv)) => {
                Ok(calv * 10f64.powf((self.intensity + attenuation - caldb) / 20.0))
            }
            _ => Err(StimulusError::CalibrationMissing),
        }
    }

    /// Check that the component can be generated at `sample_rate`
    pub fn verify(&self, sample_rate: f64) -> Result<(), StimulusError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(StimulusError::InvalidParameter {
                name: "sample_rate".to_string(),
                value: sample_rate,
            });
        }
        if !(self.duration.is_finite() && self.duration >= 0.0) {
            return Err(StimulusError::InvalidParameter {
                name: "duration".to_string(),
                value: self.duration,
            });
        }
        if !(self.risefall.is_finite() && self.risefall >= 0.0) {
            return Err(StimulusError::InvalidParameter {
                name: "risefall".to_string(),
                value: self.risefall,
            });
        }

        let nyquist = sample_rate / 2.0;
        let highest = match &self.kind {
            StimulusKind::PureTone { frequency } => Some(*frequency),
            StimulusKind::SquareWave { frequency, .. } => Some(*frequency),
            StimulusKind::FmSweep {
                start_frequency,
                stop_frequency,
            } => Some(start_frequency.max(*stop_frequency)),
            StimulusKind::Vocalization { filename: None } => {
                return Err(StimulusError::SourceMissing)
            }
            _ => None,
        };
        if let Some(frequency) = highest {
            if nyquist < frequency {
                return Err(StimulusError::InvalidSampleRate {
                    frequency,
                    sample_rate,
                });
            }
        }
        Ok(())
    }

    /// Assign a vocalization file and take the duration from its length
    ///
    /// The duration is truncated to whole milliseconds, matching the samples
    /// synthesis will keep.
    pub fn set_file(
        &mut self,
        filename: &str,
        source: &dyn WaveformSource,
    ) -> Result<(), StimulusError> {
        match &mut self.kind {
            StimulusKind::Vocalization { filename: slot } => {
                let waveform = source.read(filename)?;
                *slot = Some(filename.to_string());
                self.duration = waveform.truncated_duration();
                Ok(())
            }
            _ => Err(StimulusError::InvalidState {
                reason: format!("{} has no source file", self.name()),
            }),
        }
    }

    /// Serialize to a key-value document
    pub fn state_dict(&self) -> Result<Value, StimulusError> {
        serde_json::to_value(self).map_err(|err| StimulusError::InvalidState {
            reason: err.to_string(),
        })
    }

    /// Rebuild a component from a document produced by [`state_dict`]
    ///
    /// [`state_dict`]: StimulusComponent::state_dict
    pub fn load_state(state: &Value) -> Result<Self, StimulusError> {
        Self::deserialize(state).map_err(|err| StimulusError::InvalidState {
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_dict_is_flat_and_tagged() {
        let tone = StimulusComponent::pure_tone(5000.0, 0.02, 70.0, 0.002);
        let state = tone.state_dict().unwrap();

        assert_eq!(state["stim_type"], "pure_tone");
        assert_eq!(state["frequency"], 5000.0);
        assert_eq!(state["duration"], 0.02);
        assert_eq!(state["intensity"], 70.0);
    }

    #[test]
    fn test_load_state_restores_every_kind() {
        let components = vec![
            StimulusComponent::pure_tone(5000.0, 0.02, 70.0, 0.002),
            StimulusComponent::fm_sweep(5000.0, 100_000.0, 0.05, 60.0, 0.0),
            StimulusComponent::white_noise(0.1, 50.0, 0.005),
            StimulusComponent::vocalization(65.0, 0.0),
            StimulusComponent::square_wave(50.0, 1.0, 0.2),
            StimulusComponent::silence(0.1),
            StimulusComponent::off(),
        ];
        for component in components {
            let state = component.state_dict().unwrap();
            let restored = StimulusComponent::load_state(&state).unwrap();
            assert_eq!(restored, component, "{} did not survive", component.name());
        }
    }

    #[test]
    fn test_load_state_rejects_unknown_kind() {
        let state = json!({ "stim_type": "ripples", "duration": 0.1, "intensity": 0.0, "risefall": 0.0 });
        let err = StimulusComponent::load_state(&state).unwrap_err();
        assert!(matches!(err, StimulusError::InvalidState { .. }));
    }

    #[test]
    fn test_verify_nyquist() {
        let tone = StimulusComponent::pure_tone(30_000.0, 0.02, 70.0, 0.0);
        assert!(tone.verify(100_000.0).is_ok());
        assert_eq!(
            tone.verify(44_100.0),
            Err(StimulusError::InvalidSampleRate {
                frequency: 30_000.0,
                sample_rate: 44_100.0
            })
        );

        let sweep = StimulusComponent::fm_sweep(1000.0, 30_000.0, 0.02, 70.0, 0.0);
        assert!(sweep.verify(44_100.0).is_err());
    }

    #[test]
    fn test_verify_vocalization_without_file() {
        let voc = StimulusComponent::vocalization(60.0, 0.0);
        assert_eq!(voc.verify(44_100.0), Err(StimulusError::SourceMissing));
    }

    #[test]
    fn test_verify_negative_duration() {
        let noise = StimulusComponent::white_noise(-1.0, 60.0, 0.0);
        assert!(matches!(
            noise.verify(44_100.0),
            Err(StimulusError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_amplitude() {
        let tone = StimulusComponent::pure_tone(5000.0, 0.02, 80.0, 0.0);
        let amp = tone.amplitude(0.0, Some(80.0), Some(0.1)).unwrap();
        assert!((amp - 0.1).abs() < 1e-12);

        let amp = tone.amplitude(20.0, Some(80.0), Some(0.1)).unwrap();
        assert!((amp - 1.0).abs() < 1e-12);

        assert_eq!(
            tone.amplitude(0.0, None, Some(0.1)),
            Err(StimulusError::CalibrationMissing)
        );
    }

    #[test]
    fn test_nominal_frequency() {
        assert_eq!(
            StimulusComponent::pure_tone(5000.0, 0.1, 0.0, 0.0).nominal_frequency(),
            5000.0
        );
        assert_eq!(
            StimulusComponent::fm_sweep(2000.0, 9000.0, 0.1, 0.0, 0.0).nominal_frequency(),
            2000.0
        );
        assert_eq!(StimulusComponent::white_noise(0.1, 0.0, 0.0).nominal_frequency(), 0.0);
    }
}

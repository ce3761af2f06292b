//! Signal synthesizer
//!
//! Turns a [`StimulusComponent`] into the sample buffer sent to the output
//! device. Intensity-scaled kinds are converted to a linear amplitude with the
//! calibration reference carried in the [`SynthesisContext`]; swept, noise and
//! recorded waveforms are first normalized by their own amplitude using the
//! synthesizer's fixed [`AmplitudePolicy`].
//!
//! Results are memoized per component state and context. The cache belongs to
//! one [`CalibrationEpoch`]: the first request carrying a newer epoch drops
//! every older entry. It also holds at most a fixed number of samples and is
//! emptied whenever a buffer would not fit.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::analysis::signal_amplitude;
use crate::config::AmplitudePolicy;
use crate::error::StimulusError;

use super::component::{StimulusComponent, StimulusKind};
use super::noise::noise_prefix;
use super::source::{WavFileSource, WaveformSource};

/// Monotonic token identifying the active calibration
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CalibrationEpoch(u64);

impl CalibrationEpoch {
    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        CalibrationEpoch(self.0.wrapping_add(1))
    }
}

/// Everything besides the component that determines a synthesized buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisContext {
    pub sample_rate: f64,
    /// dB added to the component intensity
    pub attenuation: f64,
    pub caldb: Option<f64>,
    pub calv: Option<f64>,
    pub epoch: CalibrationEpoch,
}

impl SynthesisContext {
    /// Uncalibrated context; only raw kinds can be synthesized with it
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            attenuation: 0.0,
            caldb: None,
            calv: None,
            epoch: CalibrationEpoch::default(),
        }
    }

    pub fn with_reference(mut self, caldb: f64, calv: f64) -> Self {
        self.caldb = Some(caldb);
        self.calv = Some(calv);
        self
    }

    pub fn with_attenuation(mut self, attenuation: f64) -> Self {
        self.attenuation = attenuation;
        self
    }

    pub fn with_epoch(mut self, epoch: CalibrationEpoch) -> Self {
        self.epoch = epoch;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SynthKey {
    state: String,
    sample_rate: u64,
    attenuation: u64,
    caldb: Option<u64>,
    calv: Option<u64>,
}

impl SynthKey {
    fn new(component: &StimulusComponent, ctx: &SynthesisContext) -> Result<Self, StimulusError> {
        let state = serde_json::to_string(component).map_err(|err| StimulusError::InvalidState {
            reason: err.to_string(),
        })?;
        Ok(Self {
            state,
            sample_rate: ctx.sample_rate.to_bits(),
            attenuation: ctx.attenuation.to_bits(),
            caldb: ctx.caldb.map(f64::to_bits),
            calv: ctx.calv.map(f64::to_bits),
        })
    }
}

/// Samples kept in the memo cache by default (128 MiB of f64)
pub const DEFAULT_CACHE_SAMPLES: usize = 1 << 24;

#[derive(Default)]
struct SynthCache {
    epoch: CalibrationEpoch,
    entries: HashMap<SynthKey, Arc<Vec<f64>>>,
    samples: usize,
}

impl SynthCache {
    fn clear(&mut self) {
        self.entries.clear();
        self.samples = 0;
    }
}

/// Generates calibrated stimulus buffers
pub struct Synthesizer {
    policy: AmplitudePolicy,
    source: Box<dyn WaveformSource>,
    cache: Mutex<SynthCache>,
    cache_budget: usize,
}

impl Synthesizer {
    /// Synthesizer reading vocalizations from WAV files
    pub fn new(policy: AmplitudePolicy) -> Self {
        Self::with_source(policy, Box::new(WavFileSource))
    }

    pub fn with_source(policy: AmplitudePolicy, source: Box<dyn WaveformSource>) -> Self {
        Self {
            policy,
            source,
            cache: Mutex::new(SynthCache::default()),
            cache_budget: DEFAULT_CACHE_SAMPLES,
        }
    }

    /// Limit the memo cache to `samples` samples; 0 disables caching
    pub fn with_cache_budget(mut self, samples: usize) -> Self {
        self.cache_budget = samples;
        self
    }

    pub fn policy(&self) -> AmplitudePolicy {
        self.policy
    }

    pub fn source(&self) -> &dyn WaveformSource {
        self.source.as_ref()
    }

    /// Produce the output buffer for `component`
    ///
    /// # Errors
    /// - `InvalidParameter` for a non-positive rate or negative duration
    /// - `InvalidSampleRate` when a frequency exceeds Nyquist
    /// - `CalibrationMissing` for intensity-scaled kinds without a reference
    /// - `DurationTooLong`, `SourceMissing`, `SourceUnreadable`,
    ///   `SampleRateMismatch` from the noise and vocalization kinds
    pub fn synthesize(
        &self,
        component: &StimulusComponent,
        ctx: &SynthesisContext,
    ) -> Result<Arc<Vec<f64>>, StimulusError> {
        component.verify(ctx.sample_rate)?;
        let key = SynthKey::new(component, ctx)?;

        if let Some(hit) = self.cached(&key, ctx.epoch) {
            return Ok(hit);
        }

        let signal = Arc::new(self.generate(component, ctx)?);
        self.store(key, ctx.epoch, Arc::clone(&signal));
        Ok(signal)
    }

    /// Number of memoized buffers for the current epoch
    pub fn cached_len(&self) -> usize {
        self.cache
            .lock()
            .map(|cache| cache.entries.len())
            .unwrap_or(0)
    }

    /// Drop every memoized buffer
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    fn cached(&self, key: &SynthKey, epoch: CalibrationEpoch) -> Option<Arc<Vec<f64>>> {
        let cache = self.cache.lock().ok()?;
        if cache.epoch != epoch {
            return None;
        }
        cache.entries.get(key).cloned()
    }

    fn store(&self, key: SynthKey, epoch: CalibrationEpoch, signal: Arc<Vec<f64>>) {
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        if epoch > cache.epoch {
            tracing::debug!(
                "[Synthesizer] Calibration epoch {} -> {}, dropping {} cached buffers",
                cache.epoch.value(),
                epoch.value(),
                cache.entries.len()
            );
            cache.clear();
            cache.epoch = epoch;
        }
        if epoch != cache.epoch || signal.len() > self.cache_budget {
            return;
        }
        if cache.samples + signal.len() > self.cache_budget {
            tracing::debug!(
                "[Synthesizer] Cache full at {} samples, dropping {} buffers",
                cache.samples,
                cache.entries.len()
            );
            cache.clear();
        }
        cache.samples += signal.len();
        if let Some(old) = cache.entries.insert(key, signal) {
            cache.samples -= old.len();
        }
    }

    fn generate(
        &self,
        component: &StimulusComponent,
        ctx: &SynthesisContext,
    ) -> Result<Vec<f64>, StimulusError> {
        let fs = ctx.sample_rate;
        let npts = (component.duration * fs).round() as usize;

        let mut signal = match &component.kind {
            StimulusKind::PureTone { frequency } => {
                let amp = component.amplitude(ctx.attenuation, ctx.caldb, ctx.calv)?;
                (0..npts)
                    .map(|n| amp * (2.0 * PI * frequency * n as f64 / fs).sin())
                    .collect()
            }
            StimulusKind::FmSweep {
                start_frequency,
                stop_frequency,
            } => {
                let amp = component.amplitude(ctx.attenuation, ctx.caldb, ctx.calv)?;
                let sweep_rate = (stop_frequency - start_frequency) / (2.0 * component.duration);
                let raw: Vec<f64> = (0..npts)
                    .map(|n| {
                        let t = n as f64 / fs;
                        (2.0 * PI * (start_frequency * t + sweep_rate * t * t)).cos()
                    })
                    .collect();
                self.normalize(&raw, amp)
            }
            StimulusKind::WhiteNoise => {
                let amp = component.amplitude(ctx.attenuation, ctx.caldb, ctx.calv)?;
                self.normalize(noise_prefix(npts)?, amp)
            }
            StimulusKind::Vocalization { filename } => {
                let amp = component.amplitude(ctx.attenuation, ctx.caldb, ctx.calv)?;
                let filename = filename.as_deref().ok_or(StimulusError::SourceMissing)?;
                let waveform = self.source.read(filename)?;
                if (waveform.sample_rate - fs).abs() > f64::EPSILON * fs {
                    return Err(StimulusError::SampleRateMismatch {
                        expected: fs,
                        found: waveform.sample_rate,
                    });
                }
                let keep = waveform.truncated_len();
                self.normalize(&waveform.samples[..keep], amp)
            }
            StimulusKind::SquareWave {
                frequency,
                amplitude,
            } => (0..npts)
                .map(|n| {
                    let cycle = (frequency * n as f64 / fs).fract();
                    if cycle < 0.5 {
                        *amplitude
                    } else {
                        0.0
                    }
                })
                .collect(),
            StimulusKind::Silence => vec![0.0; npts],
            StimulusKind::Off => return Ok(vec![0.0, 0.0]),
        };

        if component.requires_calibration() {
            apply_risefall(&mut signal, component.risefall, fs);
        }
        Ok(signal)
    }

    /// Divide by the policy amplitude and scale to `amp`
    fn normalize(&self, raw: &[f64], amp: f64) -> Vec<f64> {
        let scale = signal_amplitude(raw, self.policy);
        if scale <= 0.0 {
            return vec![0.0; raw.len()];
        }
        raw.iter().map(|s| s / scale * amp).collect()
    }
}

/// Apply a Hann taper over `risefall * fs / 2` samples at each edge
///
/// The taper is the two halves of a symmetric Hann window of twice that
/// length; interior samples are untouched.
pub fn apply_risefall(signal: &mut [f64], risefall: f64, fs: f64) {
    let mut rf_npts = ((risefall * fs) as usize) / 2;
    rf_npts = rf_npts.min(signal.len() / 2);
    if rf_npts == 0 {
        return;
    }

    let window_len = 2 * rf_npts;
    let hann = |n: usize| 0.5 - 0.5 * (2.0 * PI * n as f64 / (window_len - 1) as f64).cos();

    let len = signal.len();
    for i in 0..rf_npts {
        signal[i] *= hann(i);
        signal[len - rf_npts + i] *= hann(rf_npts + i);
    }
}

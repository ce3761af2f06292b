// Stimulus module - descriptors and calibrated signal synthesis

pub mod component;
pub mod noise;
pub mod source;
pub mod synth;

pub use component::{StimulusComponent, StimulusKind};
pub use noise::{noise_prefix, NOISE_SEQUENCE_LEN};
pub use source::{WavFileSource, Waveform, WaveformSource};
pub use synth::{
    apply_risefall, CalibrationEpoch, SynthesisContext, Synthesizer, DEFAULT_CACHE_SAMPLES,
};

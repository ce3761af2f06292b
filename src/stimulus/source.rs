//! Recorded waveform sources for vocalization stimuli

use std::path::Path;

use crate::error::StimulusError;

/// Mono waveform with its native sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub sample_rate: f64,
    pub samples: Vec<f64>,
}

impl Waveform {
    /// Number of samples covering a whole number of milliseconds
    pub fn truncated_len(&self) -> usize {
        if self.sample_rate <= 0.0 {
            return 0;
        }
        let whole_ms = (self.samples.len() as f64 * 1000.0 / self.sample_rate).floor();
        let npts = (whole_ms / 1000.0 * self.sample_rate + 1e-9).floor() as usize;
        npts.min(self.samples.len())
    }

    /// Duration in seconds truncated to whole milliseconds
    pub fn truncated_duration(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        (self.samples.len() as f64 * 1000.0 / self.sample_rate).floor() / 1000.0
    }
}

/// Provider of recorded waveforms by file name
pub trait WaveformSource: Send + Sync {
    fn read(&self, filename: &str) -> Result<Waveform, StimulusError>;
}

/// Reads PCM or float WAV files, mixing multi-channel files down to mono
#[derive(Debug, Default, Clone, Copy)]
pub struct WavFileSource;

impl WaveformSource for WavFileSource {
    fn read(&self, filename: &str) -> Result<Waveform, StimulusError> {
        read_wav(Path::new(filename))
    }
}

fn unreadable(path: &Path, reason: String) -> StimulusError {
    StimulusError::SourceUnreadable {
        path: path.display().to_string(),
        reason,
    }
}

fn read_wav(path: &Path) -> Result<Waveform, StimulusError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|err| unreadable(path, err.to_string()))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(unreadable(path, "zero channels".to_string()));
    }

    let samples: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|sample| {
                sample
                    .map(f64::from)
                    .map_err(|err| unreadable(path, err.to_string()))
            })
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            if bits == 0 || bits > 32 {
                return Err(unreadable(
                    path,
                    format!("unsupported bits_per_sample={}", bits),
                ));
            }
            let full_scale = (1i64 << (bits - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|sample| {
                    sample
                        .map(|v| v as f64 / full_scale)
                        .map_err(|err| unreadable(path, err.to_string()))
                })
                .collect::<Result<_, _>>()?
        }
    };

    let channels = spec.channels as usize;
    let samples = if channels == 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f64>() / channels as f64)
            .collect()
    };

    Ok(Waveform {
        sample_rate: spec.sample_rate as f64,
        samples,
    })
}

//! Magnitude spectra and amplitude measures
//!
//! Calibration compares the spectrum of what was played with the spectrum of
//! what was recorded. Signals are zero-padded and no window is applied, so a
//! tone's bin magnitude is directly proportional to its amplitude.

use rustfft::{num_complex::Complex, FftPlanner};
use std::sync::Mutex;

use crate::config::AmplitudePolicy;

/// Floor used wherever a magnitude ends up in a logarithm
pub const MAGNITUDE_FLOOR: f64 = 1e-12;

/// One-sided magnitude spectrum with its frequency axis
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Bin center frequencies in Hz, ascending from 0 to Nyquist
    pub frequencies: Vec<f64>,
    /// Normalized |FFT| for each bin
    pub magnitudes: Vec<f64>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Index of the bin whose center frequency is closest to `frequency`
    ///
    /// Exact midpoints round up. Returns `None` for an empty spectrum.
    pub fn nearest_bin(&self, frequency: f64) -> Option<usize> {
        if self.frequencies.len() < 2 {
            return if self.frequencies.is_empty() { None } else { Some(0) };
        }
        let resolution = self.frequencies[1] - self.frequencies[0];
        let ix = (frequency / resolution).round();
        let last = self.frequencies.len() - 1;
        if ix <= 0.0 {
            Some(0)
        } else if ix as usize >= last {
            Some(last)
        } else {
            Some(ix as usize)
        }
    }

    /// Magnitude at the bin nearest `frequency`
    pub fn magnitude_at(&self, frequency: f64) -> Option<f64> {
        self.nearest_bin(frequency).map(|ix| self.magnitudes[ix])
    }
}

/// FFT processor that computes zero-padded magnitude spectra
pub struct SpectrumAnalyzer {
    fft_planner: Mutex<FftPlanner<f64>>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            fft_planner: Mutex::new(FftPlanner::new()),
        }
    }

    /// Compute the one-sided magnitude spectrum of `signal`
    ///
    /// # Arguments
    /// * `signal` - Time domain samples
    /// * `rate` - Sample rate of `signal` in Hz
    ///
    /// # Returns
    /// Spectrum with `padto / 2 + 1` bins where `padto` is the next power of
    /// two at or above the signal length. Magnitudes are normalized by the
    /// unpadded length. An empty signal yields an empty spectrum.
    pub fn calc_spectrum(&self, signal: &[f64], rate: f64) -> Spectrum {
        let npts = signal.len();
        self.transform(signal, rate, npts.next_power_of_two(), npts as f64)
    }

    /// Spectrum of `signal` zero-padded to `padto` points, scaled per unit time
    ///
    /// Magnitudes are `|FFT| / rate`, which approximates the continuous
    /// spectrum: it does not depend on the signal's length or sample rate.
    /// Two signals padded to the same duration share their bin frequencies.
    /// `padto` is raised to the signal length if it is shorter.
    pub fn calc_density(&self, signal: &[f64], rate: f64, padto: usize) -> Spectrum {
        self.transform(signal, rate, padto.max(signal.len()), rate)
    }

    fn transform(&self, signal: &[f64], rate: f64, padto: usize, norm: f64) -> Spectrum {
        if signal.is_empty() {
            return Spectrum {
                frequencies: Vec::new(),
                magnitudes: Vec::new(),
            };
        }

        let mut buffer: Vec<Complex<f64>> = signal.iter().map(|&s| Complex::new(s, 0.0)).collect();
        buffer.resize(padto, Complex::new(0.0, 0.0));

        {
            // A poisoned planner still holds valid cached plans
            let mut planner = self
                .fft_planner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let fft = planner.plan_fft_forward(padto);
            fft.process(&mut buffer);
        }

        let nbins = padto / 2 + 1;
        let magnitudes = buffer[..nbins].iter().map(|c| c.norm() / norm).collect();
        let frequencies = (0..nbins)
            .map(|k| k as f64 * rate / padto as f64)
            .collect();

        Spectrum {
            frequencies,
            magnitudes,
        }
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Root-mean-square of a signal (0 for an empty signal)
pub fn rms(signal: &[f64]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|s| s * s).sum::<f64>() / signal.len() as f64).sqrt()
}

/// Largest absolute sample value (0 for an empty signal)
pub fn peak(signal: &[f64]) -> f64 {
    signal.iter().fold(0.0_f64, |acc, s| acc.max(s.abs()))
}

/// Amplitude of a signal under the given normalization policy
pub fn signal_amplitude(signal: &[f64], policy: AmplitudePolicy) -> f64 {
    match policy {
        AmplitudePolicy::Rms => rms(signal),
        AmplitudePolicy::Peak => peak(signal),
    }
}

/// Level of `value` relative to `reference` in dB
pub fn calc_db(value: f64, reference: f64) -> f64 {
    20.0 * (value.max(MAGNITUDE_FLOOR) / reference.max(MAGNITUDE_FLOOR)).log10()
}

/// Subtract the mean from every sample
pub fn remove_dc(signal: &[f64]) -> Vec<f64> {
    if signal.is_empty() {
        return Vec::new();
    }
    let mean = signal.iter().sum::<f64>() / signal.len() as f64;
    signal.iter().map(|s| s - mean).collect()
}

/// Centered moving average over `points` samples
///
/// Edges average over the part of the window that lies inside the data, so
/// the output has the same length as the input. `points <= 1` returns the
/// input unchanged.
pub fn smooth(values: &[f64], points: usize) -> Vec<f64> {
    if points <= 1 || values.is_empty() {
        return values.to_vec();
    }
    let half = points / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + points - half).min(values.len());
            let window = &values[start..end];
            window.iter().sum::<f64>() / window.len() as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, rate: f64, npts: usize, amp: f64) -> Vec<f64> {
        (0..npts)
            .map(|n| amp * (2.0 * PI * freq * n as f64 / rate).sin())
            .collect()
    }

    #[test]
    fn test_spectrum_axis() {
        let analyzer = SpectrumAnalyzer::new();
        let spectrum = analyzer.calc_spectrum(&vec![0.0; 1000], 1000.0);
        // padded to 1024
        assert_eq!(spectrum.len(), 513);
        assert_eq!(spectrum.frequencies[0], 0.0);
        assert!((spectrum.frequencies[512] - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_tone_peak_at_expected_bin() {
        let analyzer = SpectrumAnalyzer::new();
        let rate = 1024.0;
        let signal = sine(64.0, rate, 1024, 2.0);
        let spectrum = analyzer.calc_spectrum(&signal, rate);

        let peak_bin = spectrum
            .magnitudes
            .iter()
            .enumerate()
            .fold((0, 0.0), |acc, (i, &m)| if m > acc.1 { (i, m) } else { acc })
            .0;
        assert_eq!(Some(peak_bin), spectrum.nearest_bin(64.0));
        // amplitude / 2 for a bin-centered sine
        assert!((spectrum.magnitudes[peak_bin] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_signal() {
        let analyzer = SpectrumAnalyzer::new();
        let spectrum = analyzer.calc_spectrum(&[], 1000.0);
        assert!(spectrum.is_empty());
        assert_eq!(spectrum.nearest_bin(10.0), None);
    }

    #[test]
    fn test_nearest_bin_clamps() {
        let spectrum = Spectrum {
            frequencies: vec![0.0, 10.0, 20.0, 30.0],
            magnitudes: vec![1.0, 2.0, 3.0, 4.0],
        };
        assert_eq!(spectrum.nearest_bin(-5.0), Some(0));
        assert_eq!(spectrum.nearest_bin(14.0), Some(1));
        assert_eq!(spectrum.nearest_bin(16.0), Some(2));
        assert_eq!(spectrum.nearest_bin(1000.0), Some(3));
        assert_eq!(spectrum.magnitude_at(29.0), Some(4.0));
    }

    #[test]
    fn test_amplitude_measures() {
        let signal = vec![1.0, -1.0, 1.0, -1.0];
        assert!((rms(&signal) - 1.0).abs() < 1e-12);
        assert_eq!(peak(&[0.5, -2.0, 1.0]), 2.0);
        assert_eq!(signal_amplitude(&[0.5, -2.0], AmplitudePolicy::Peak), 2.0);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_calc_db() {
        assert!((calc_db(10.0, 1.0) - 20.0).abs() < 1e-12);
        assert!((calc_db(0.5, 1.0) + 6.0206).abs() < 1e-3);
        assert_eq!(calc_db(1.0, 1.0), 0.0);
    }

    #[test]
    fn test_smooth() {
        let values = vec![0.0, 3.0, 0.0, 3.0, 0.0];
        let smoothed = smooth(&values, 3);
        assert_eq!(smoothed.len(), values.len());
        assert!((smoothed[0] - 1.5).abs() < 1e-12);
        assert!((smoothed[1] - 1.0).abs() < 1e-12);
        assert!((smoothed[2] - 2.0).abs() < 1e-12);
        assert_eq!(smooth(&values, 1), values);
    }

    #[test]
    fn test_remove_dc() {
        let out = remove_dc(&[1.0, 2.0, 3.0]);
        assert_eq!(out, vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_density_independent_of_rate_and_padding() {
        let analyzer = SpectrumAnalyzer::new();
        // 100 ms of a 1 kHz tone, sampled at two rates and padded to 200 ms
        let slow = analyzer.calc_density(&sine(1_000.0, 8_000.0, 800, 1.0), 8_000.0, 1_600);
        let fast = analyzer.calc_density(&sine(1_000.0, 32_000.0, 3_200, 1.0), 32_000.0, 6_400);

        assert_eq!(slow.frequencies[1], fast.frequencies[1]);
        let ix = slow.nearest_bin(1_000.0).unwrap();
        assert_eq!(fast.nearest_bin(1_000.0), Some(ix));
        // amplitude / 2 times the 100 ms duration
        assert!((slow.magnitudes[ix] - 0.05).abs() < 1e-9);
        assert!((fast.magnitudes[ix] - 0.05).abs() < 1e-9);
    }
}

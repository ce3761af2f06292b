//! Broadband calibration
//!
//! One swept or noise stimulus is played repeatedly; the averaged recording is
//! compared bin by bin with the played signal to get the system's transfer
//! curve over the stimulus band.

use serde_json::{json, Map};

use crate::analysis::{calc_db, remove_dc, smooth, SpectrumAnalyzer};
use crate::error::{log_calibration_error, CalibrationError, StoreError};
use crate::store::{unique_name, DurableStore};

use super::record::{CalibrationRecord, CalibrationReference, CurveMode};

/// Prefix of broadband calibration groups in the durable store
pub const CALIBRATION_GROUP_PREFIX: &str = "calibration";

/// Nested dataset holding a saved curve
pub const CALIBRATION_CURVE_DATASET: &str = "calibration_intensities";

/// Element-wise mean of equal-length responses
///
/// Responses of different lengths are truncated to the shortest.
pub fn average_responses(responses: &[Vec<f64>]) -> Result<Vec<f64>, CalibrationError> {
    let npts = responses.iter().map(Vec::len).min().unwrap_or(0);
    if npts == 0 {
        return Err(CalibrationError::InsufficientData {
            reason: "no response samples collected".to_string(),
        });
    }
    let count = responses.len() as f64;
    let mut avg = vec![0.0; npts];
    for response in responses {
        for (acc, value) in avg.iter_mut().zip(response) {
            *acc += value;
        }
    }
    for value in &mut avg {
        *value /= count;
    }
    Ok(avg)
}

/// Zero-padded lengths that put two signals on the same bin grid
///
/// Each signal is padded to the longest of their power-of-two durations, so
/// both spectra have the same bin spacing. At equal rates this is plain
/// power-of-two padding.
fn shared_padding(
    stimulus_len: usize,
    stimulus_rate: f64,
    response_len: usize,
    response_rate: f64,
) -> (usize, usize) {
    let duration = (stimulus_len.next_power_of_two() as f64 / stimulus_rate)
        .max(response_len.next_power_of_two() as f64 / response_rate);
    let pad = |rate: f64| (duration * rate).round() as usize;
    (pad(stimulus_rate), pad(response_rate))
}

/// Transfer curve of a played stimulus against its averaged recording
///
/// Both signals have their DC removed and are zero-padded to a common
/// duration. Spectra are scaled per unit time, so a stimulus shorter than the
/// recording window, or played at a different rate than it was recorded,
/// still yields the true gain. Every stimulus bin inside `frange` is paired
/// with the response bin nearest its frequency and yields
/// `20 log10(|Y| / |X|)`.
///
/// # Errors
/// `InsufficientData` for empty signals, a band above the Nyquist frequency of
/// either signal, or a band holding no spectral bins.
#[allow(clippy::too_many_arguments)]
pub fn compute_broadband(
    analyzer: &SpectrumAnalyzer,
    stimulus: &[f64],
    stimulus_rate: f64,
    response: &[f64],
    response_rate: f64,
    frange: (f64, f64),
    reference: CalibrationReference,
    smoothing_points: usize,
) -> Result<CalibrationRecord, CalibrationError> {
    if stimulus.is_empty() || response.is_empty() {
        return Err(CalibrationError::InsufficientData {
            reason: "empty stimulus or response".to_string(),
        });
    }
    let nyquist = stimulus_rate.min(response_rate) / 2.0;
    if frange.1 > nyquist {
        return Err(CalibrationError::InsufficientData {
            reason: format!(
                "band edge {} Hz is above the {} Hz Nyquist frequency",
                frange.1, nyquist
            ),
        });
    }

    let (stimulus_pad, response_pad) =
        shared_padding(stimulus.len(), stimulus_rate, response.len(), response_rate);
    let x = analyzer.calc_density(&remove_dc(stimulus), stimulus_rate, stimulus_pad);
    let y = analyzer.calc_density(&remove_dc(response), response_rate, response_pad);

    let mut frequencies = Vec::new();
    let mut attenuations = Vec::new();
    for (i, &freq) in x.frequencies.iter().enumerate() {
        if freq < frange.0 || freq > frange.1 {
            continue;
        }
        let Some(j) = y.nearest_bin(freq) else {
            continue;
        };
        frequencies.push(freq);
        attenuations.push(calc_db(y.magnitudes[j], x.magnitudes[i]));
    }

    if frequencies.is_empty() {
        return Err(CalibrationError::InsufficientData {
            reason: format!("no spectral bins inside [{}, {}] Hz", frange.0, frange.1),
        });
    }

    let attenuations = smooth(&attenuations, smoothing_points);
    CalibrationRecord::new(
        CurveMode::Broadband,
        attenuations,
        frequencies,
        frange,
        reference,
    )
}

fn persistence(err: StoreError) -> CalibrationError {
    CalibrationError::PersistenceFailed {
        details: err.to_string(),
    }
}

/// Raw responses of one broadband calibration run
///
/// The dataset reserves a uniquely named group in the durable store when it
/// is created. [`CalibrationDataset::finish`] either writes the responses and
/// the computed curve into that group or deletes it.
#[derive(Debug)]
pub struct CalibrationDataset {
    name: String,
    repetitions: usize,
    samples: usize,
    responses: Vec<Vec<f64>>,
}

impl CalibrationDataset {
    /// Reserve `calibration_N` in `durable` for a run of `repetitions` responses
    pub fn begin(
        durable: &mut dyn DurableStore,
        repetitions: usize,
        samples: usize,
        response_rate: f64,
    ) -> Result<Self, CalibrationError> {
        let name = unique_name(durable, CALIBRATION_GROUP_PREFIX);
        durable.init_group(&name).map_err(persistence)?;

        let mut info = Map::new();
        info.insert("samplerate_ad".to_string(), json!(response_rate));
        durable.set_metadata(&name, info).map_err(persistence)?;

        tracing::debug!(
            "[Calibration] Reserved '{}' for {} responses of {} samples",
            name,
            repetitions,
            samples
        );
        Ok(Self {
            name,
            repetitions,
            samples,
            responses: Vec::with_capacity(repetitions),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn push(&mut self, response: Vec<f64>) {
        self.responses.push(response);
    }

    pub fn responses(&self) -> &[Vec<f64>] {
        &self.responses
    }

    /// Mean response over every pushed repetition
    pub fn average(&self) -> Result<Vec<f64>, CalibrationError> {
        average_responses(&self.responses)
    }

    /// Save or discard the run
    ///
    /// With `save`, the raw responses go to `{name}/signal` and `record`'s
    /// values to `{name}/calibration_intensities` together with the reference
    /// triple. Without `save`, the whole group is deleted.
    pub fn finish(
        self,
        durable: &mut dyn DurableStore,
        save: bool,
        record: Option<&CalibrationRecord>,
    ) -> Result<Option<String>, CalibrationError> {
        let result = if save {
            self.save(durable, record).map(|()| Some(self.name.clone()))
        } else {
            durable
                .delete_group(&self.name)
                .and_then(|()| durable.flush())
                .map(|()| None)
                .map_err(persistence)
        };
        if let Err(err) = &result {
            log_calibration_error(err, "finish_calibration");
        }
        result
    }

    fn save(
        &self,
        durable: &mut dyn DurableStore,
        record: Option<&CalibrationRecord>,
    ) -> Result<(), CalibrationError> {
        let record = record.ok_or_else(|| CalibrationError::InsufficientData {
            reason: "no calibration curve to save".to_string(),
        })?;

        let signal = format!("{}/signal", self.name);
        durable
            .init_dataset(&signal, &[self.responses.len(), self.samples])
            .map_err(persistence)?;
        for response in &self.responses {
            let mut row = response.clone();
            row.resize(self.samples, 0.0);
            durable.append(&signal, &row).map_err(persistence)?;
        }

        let curve = format!("{}/{}", self.name, CALIBRATION_CURVE_DATASET);
        durable
            .init_dataset(&curve, &[record.attenuations().len()])
            .map_err(persistence)?;
        durable
            .append(&curve, record.attenuations())
            .map_err(persistence)?;

        let mut info = Map::new();
        info.insert("frequencies".to_string(), json!(record.frequencies()));
        info.insert("calibration_dB".to_string(), json!(record.caldb()));
        info.insert("calibration_voltage".to_string(), json!(record.calv()));
        info.insert("calibration_frequency".to_string(), json!(record.calf()));
        info.insert("repetitions".to_string(), json!(self.repetitions));
        durable.set_metadata(&curve, info).map_err(persistence)?;

        durable.flush().map_err(persistence)?;
        tracing::info!("[Calibration] Saved calibration '{}'", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AmplitudePolicy;
    use crate::stimulus::{StimulusComponent, SynthesisContext, Synthesizer};
    use crate::store::MemoryStore;

    fn reference() -> CalibrationReference {
        CalibrationReference::new(20_000.0, 100.0, 0.1)
    }

    #[test]
    fn test_scaled_response_gives_constant_gain() {
        let synth = Synthesizer::new(AmplitudePolicy::Rms);
        let sweep = StimulusComponent::fm_sweep(5_000.0, 50_000.0, 0.05, 100.0, 0.0);
        let fs = 200_000.0;
        let stimulus = synth
            .synthesize(&sweep, &SynthesisContext::new(fs).with_reference(100.0, 0.1))
            .unwrap();

        let k = 0.25;
        let response: Vec<f64> = stimulus.iter().map(|s| s * k).collect();

        let analyzer = SpectrumAnalyzer::new();
        let record = compute_broadband(
            &analyzer,
            &stimulus,
            fs,
            &response,
            fs,
            (5_000.0, 50_000.0),
            reference(),
            0,
        )
        .unwrap();

        let expected = 20.0 * k.log10();
        assert!((record.reference_attenuation() - expected).abs() < 1e-6);
        assert!(record
            .attenuations()
            .iter()
            .all(|a| (a - expected).abs() < 1e-6));
        assert!(record.frequencies()[0] >= 5_000.0);
        assert!(*record.frequencies().last().unwrap() <= 50_000.0);
    }

    #[test]
    fn test_shorter_stimulus_at_higher_rate() {
        let synth = Synthesizer::new(AmplitudePolicy::Rms);
        let sweep = StimulusComponent::fm_sweep(2_000.0, 15_000.0, 0.05, 100.0, 0.0);
        let fs = 400_000.0;
        let stimulus = synth
            .synthesize(&sweep, &SynthesisContext::new(fs).with_reference(100.0, 0.1))
            .unwrap();

        // every tenth sample at half gain, inside a window twice as long
        let k = 0.5;
        let mut response: Vec<f64> = stimulus.iter().step_by(10).map(|s| s * k).collect();
        response.resize(4_000, 0.0);

        let analyzer = SpectrumAnalyzer::new();
        let record = compute_broadband(
            &analyzer,
            &stimulus,
            fs,
            &response,
            fs / 10.0,
            (2_000.0, 15_000.0),
            CalibrationReference::new(8_000.0, 100.0, 0.1),
            0,
        )
        .unwrap();

        assert!((record.reference_attenuation() - 20.0 * k.log10()).abs() < 0.1);
    }

    #[test]
    fn test_band_above_recording_nyquist() {
        let analyzer = SpectrumAnalyzer::new();
        let err = compute_broadband(
            &analyzer,
            &[1.0, -1.0, 1.0, -1.0],
            500_000.0,
            &[1.0, -1.0],
            50_000.0,
            (5_000.0, 50_000.0),
            reference(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, CalibrationError::InsufficientData { .. }));
    }

    #[test]
    fn test_shared_padding_matches_bin_spacing() {
        assert_eq!(shared_padding(1000, 1000.0, 800, 1000.0), (1024, 1024));
        let (x, y) = shared_padding(100_000, 500_000.0, 10_000, 50_000.0);
        assert_eq!((x, y), (163_840, 16_384));
        assert_eq!(500_000.0 / x as f64, 50_000.0 / y as f64);
    }

    #[test]
    fn test_empty_response() {
        let analyzer = SpectrumAnalyzer::new();
        let err = compute_broadband(
            &analyzer,
            &[1.0, 2.0],
            1000.0,
            &[],
            1000.0,
            (0.0, 500.0),
            reference(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, CalibrationError::InsufficientData { .. }));
    }

    #[test]
    fn test_average_responses() {
        let avg = average_responses(&[vec![1.0, 2.0, 3.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(avg, vec![2.0, 3.0]);
        assert!(average_responses(&[]).is_err());
    }

    fn saved_record() -> CalibrationRecord {
        CalibrationRecord::new(
            CurveMode::Broadband,
            vec![-1.0, 0.0],
            vec![10_000.0, 20_000.0],
            (10_000.0, 20_000.0),
            reference(),
        )
        .unwrap()
    }

    #[test]
    fn test_save_writes_curve_and_metadata() {
        let mut durable = MemoryStore::new();
        let mut dataset = CalibrationDataset::begin(&mut durable, 2, 3, 50_000.0).unwrap();
        assert_eq!(dataset.name(), "calibration_0");
        dataset.push(vec![1.0, 2.0, 3.0]);
        dataset.push(vec![3.0, 2.0, 1.0]);
        assert_eq!(dataset.average().unwrap(), vec![2.0, 2.0, 2.0]);

        let record = saved_record();
        let name = dataset.finish(&mut durable, true, Some(&record)).unwrap();
        assert_eq!(name.as_deref(), Some("calibration_0"));

        assert_eq!(
            durable.get("calibration_0/calibration_intensities").unwrap(),
            vec![-1.0, 0.0]
        );
        assert_eq!(durable.shape("calibration_0/signal").unwrap(), vec![2, 3]);
        let meta = durable.metadata("calibration_0/calibration_intensities").unwrap();
        assert_eq!(meta["calibration_dB"], 100.0);
        assert_eq!(meta["calibration_frequency"], 20_000.0);

        // next run gets a fresh name
        let next = CalibrationDataset::begin(&mut durable, 1, 3, 50_000.0).unwrap();
        assert_eq!(next.name(), "calibration_1");
    }

    #[test]
    fn test_discard_deletes_group() {
        let mut durable = MemoryStore::new();
        let mut dataset = CalibrationDataset::begin(&mut durable, 1, 2, 50_000.0).unwrap();
        dataset.push(vec![0.0, 1.0]);

        let name = dataset.finish(&mut durable, false, None).unwrap();
        assert_eq!(name, None);
        assert!(durable.keys().is_empty());
    }
}

//! Integration tests for calibration workflows
//!
//! These tests run calibration acquisitions end to end:
//! - Broadband sweep through a loopback path with a known gain
//! - Broadband gain with a sweep shorter than the window and a rate change
//! - Saving and discarding calibration groups in a durable store
//! - Tone-curve (point) calibration with a frequency-dependent device
//! - Applying the resulting record through the calibration manager

use auditory_acquisition::acquisition::{BroadbandSink, ToneCurveSink};
use auditory_acquisition::calibration::{
    CalibrationDataset, CalibrationInput, CalibrationProcessor, CalibrationReference, CurveMode,
    CALIBRATION_CURVE_DATASET,
};
use auditory_acquisition::config::PointMeasure;
use auditory_acquisition::device::{LoopbackDevice, PlayRecord};
use auditory_acquisition::error::{AcquisitionError, CalibrationError};
use auditory_acquisition::store::{DurableStore, JsonFileStore, MemoryStore};
use auditory_acquisition::{
    AcquisitionCoordinator, AcquisitionEvent, AppConfig, ChannelName, StimulusComponent,
};

fn reference(config: &AppConfig) -> CalibrationReference {
    let cal = &config.calibration;
    CalibrationReference::new(cal.calf, cal.caldb, cal.calv)
}

/// Broadband run at a common 50 kHz rate so the loopback does not resample
fn broadband_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.synthesis.generation_rate = 50_000.0;
    config.acquisition.input_rate = 50_000.0;
    config.acquisition.window = 0.2;
    config.acquisition.repetitions = 3;
    config
}

#[test]
fn test_broadband_calibration_recovers_gain() {
    let config = broadband_config();
    let acq = &config.acquisition;
    let gain = 0.5;

    let mut durable = MemoryStore::new();
    let samples = (acq.window * acq.input_rate).round() as usize;
    let dataset =
        CalibrationDataset::begin(&mut durable, acq.repetitions, samples, acq.input_rate).unwrap();

    let device = LoopbackDevice::from_config(acq).with_gain(gain);
    let mut coordinator = AcquisitionCoordinator::new(&config, Box::new(device));
    coordinator.set_protocol(vec![StimulusComponent::fm_sweep(
        5_000.0, 20_000.0, 0.2, 100.0, 0.0,
    )]);
    assert_eq!(coordinator.setup(0.0).unwrap(), 3);

    let outcome = coordinator.run(BroadbandSink::new(dataset)).unwrap().join().unwrap();
    assert_eq!(outcome.result.unwrap().completed, 3);

    let (dataset, stimulus) = outcome.sink.into_parts();
    assert_eq!(dataset.len(), 3);
    let stimulus = stimulus.unwrap();

    let processor = CalibrationProcessor::from_config(&config.calibration);
    let record = processor
        .compute(
            CalibrationInput::Broadband {
                stimulus: &stimulus,
                stimulus_rate: config.synthesis.generation_rate,
                responses: dataset.responses(),
                response_rate: acq.input_rate,
                frange: (5_000.0, 20_000.0),
            },
            reference(&config),
        )
        .unwrap();

    assert_eq!(record.mode(), CurveMode::Broadband);
    assert!((record.reference_attenuation() - 20.0 * gain.log10()).abs() < 1e-6);
    assert!(record.relative_curve()[record.nearest_index(20_000.0)].abs() < 1e-12);

    let name = dataset.finish(&mut durable, true, Some(&record)).unwrap();
    assert_eq!(name.as_deref(), Some("calibration_0"));
    let curve_key = format!("calibration_0/{}", CALIBRATION_CURVE_DATASET);
    assert_eq!(durable.get(&curve_key).unwrap(), record.attenuations().to_vec());
    assert_eq!(durable.shape("calibration_0/signal").unwrap(), vec![3, 10_000]);
}

/// Sweep generated at 500 kHz, half the window long, recorded at 50 kHz
#[test]
fn test_broadband_gain_with_short_sweep_and_rate_change() {
    let mut config = AppConfig::default();
    config.synthesis.generation_rate = 500_000.0;
    config.acquisition.input_rate = 50_000.0;
    config.acquisition.window = 0.2;
    config.acquisition.repetitions = 2;
    config.calibration.calf = 10_000.0;
    let acq = &config.acquisition;
    let gain = 0.5;

    let mut durable = MemoryStore::new();
    let dataset =
        CalibrationDataset::begin(&mut durable, acq.repetitions, 10_000, acq.input_rate).unwrap();
    let device = LoopbackDevice::from_config(acq).with_gain(gain);
    let mut coordinator = AcquisitionCoordinator::new(&config, Box::new(device));
    coordinator.set_protocol(vec![StimulusComponent::fm_sweep(
        2_000.0, 20_000.0, 0.1, 100.0, 0.0,
    )]);
    coordinator.setup(0.0).unwrap();

    let outcome = coordinator.run(BroadbandSink::new(dataset)).unwrap().join().unwrap();
    assert_eq!(outcome.result.unwrap().completed, 2);
    let (dataset, stimulus) = outcome.sink.into_parts();
    let stimulus = stimulus.unwrap();
    assert_eq!(stimulus.len(), 50_000);

    let processor = CalibrationProcessor::from_config(&config.calibration);
    let input = |frange| CalibrationInput::Broadband {
        stimulus: &stimulus,
        stimulus_rate: config.synthesis.generation_rate,
        responses: dataset.responses(),
        response_rate: acq.input_rate,
        frange,
    };

    let record = processor
        .compute(input((2_000.0, 20_000.0)), reference(&config))
        .unwrap();
    assert!((record.reference_attenuation() - 20.0 * gain.log10()).abs() < 0.1);
    assert!(*record.frequencies().last().unwrap() <= 20_000.0);

    // the recording cannot hold anything above 25 kHz
    let err = processor
        .compute(input((2_000.0, 50_000.0)), reference(&config))
        .unwrap_err();
    assert!(matches!(err, CalibrationError::InsufficientData { .. }));
}

#[test]
fn test_discarded_calibration_leaves_no_group() {
    let path = std::env::temp_dir().join(format!(
        "auditory_acquisition_discard_{}.json",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);

    let mut durable = JsonFileStore::open(&path).unwrap();
    let mut dataset = CalibrationDataset::begin(&mut durable, 1, 4, 50_000.0).unwrap();
    dataset.push(vec![0.0, 1.0, 0.0, -1.0]);
    assert_eq!(dataset.finish(&mut durable, false, None).unwrap(), None);

    let reopened = JsonFileStore::open(&path).unwrap();
    assert!(reopened.keys().is_empty());
    let _ = std::fs::remove_file(&path);
}

/// Loopback whose gain changes with every call
struct ScriptedDevice {
    gains: Vec<f64>,
    calls: usize,
    inner: LoopbackDevice,
}

impl PlayRecord for ScriptedDevice {
    fn configure(&mut self, output: &str, input: &str) -> Result<(), AcquisitionError> {
        self.inner.configure(output, input)
    }

    fn play_and_record(
        &mut self,
        buffer: &[f64],
        sample_rate: f64,
    ) -> Result<Vec<f64>, AcquisitionError> {
        let gain = self.gains[self.calls % self.gains.len()];
        self.calls += 1;
        let response = self.inner.play_and_record(buffer, sample_rate)?;
        Ok(response.into_iter().map(|v| v * gain).collect())
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn reconnect(&mut self) -> Result<(), AcquisitionError> {
        self.inner.reconnect()
    }
}

#[test]
fn test_tone_curve_two_entry_vector() {
    let mut config = AppConfig::default();
    config.synthesis.generation_rate = 500_000.0;
    config.acquisition.input_rate = 50_000.0;
    config.acquisition.window = 0.01;
    config.calibration.point_measure = PointMeasure::Peak;
    let reference = reference(&config);

    // reference tone first at full gain, then 10 kHz at a quarter
    let device = ScriptedDevice {
        gains: vec![1.0, 0.25],
        calls: 0,
        inner: LoopbackDevice::from_config(&config.acquisition),
    };
    let mut coordinator = AcquisitionCoordinator::new(&config, Box::new(device));
    coordinator.set_protocol(vec![
        StimulusComponent::pure_tone(reference.calf, 0.01, reference.caldb, 0.0),
        StimulusComponent::pure_tone(10_000.0, 0.01, reference.caldb, 0.0),
    ]);
    coordinator.setup(0.0).unwrap();

    let processor = CalibrationProcessor::from_config(&config.calibration);
    let mut averages = coordinator.hub().receiver(ChannelName::AverageResponse);
    let mut spectra = coordinator
        .hub()
        .receiver(ChannelName::CalibrationResponseCollected);

    let sink = ToneCurveSink::new(processor.tone_curve_dataset(reference, 1), 50_000.0);
    let outcome = coordinator.run(sink).unwrap().join().unwrap();
    assert_eq!(outcome.result.unwrap().completed, 2);

    let dataset = outcome.sink.into_dataset();
    let record = processor
        .compute(CalibrationInput::ToneCurve(&dataset), reference)
        .unwrap();

    assert_eq!(record.frequencies(), &[10_000.0, 20_000.0]);
    let expected = -20.0 * 0.25f64.log10();
    assert!((record.attenuations()[0] - expected).abs() < 1e-6);
    assert!(record.attenuations()[1].abs() < 1e-12);

    let averaged: Vec<AcquisitionEvent> = averages.drain();
    assert_eq!(averaged.len(), 2);
    match &averaged[0] {
        AcquisitionEvent::AverageResponse { result_db, .. } => {
            assert!((result_db - reference.caldb).abs() < 1e-9)
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(spectra.drain().len(), 2);

    // the record can be applied right away
    let calibration = coordinator.calibration();
    calibration.stash(record).unwrap();
    let before = calibration.epoch().unwrap();
    assert!(calibration.apply(true).unwrap() > before);
    assert!(calibration.active().unwrap().is_some());
}

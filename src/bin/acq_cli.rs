use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use auditory_acquisition::acquisition::{BroadbandSink, ProtocolSink, ToneCurveSink};
use auditory_acquisition::calibration::{
    CalibrationDataset, CalibrationInput, CalibrationProcessor, CalibrationRecord,
    CalibrationReference,
};
use auditory_acquisition::device::LoopbackDevice;
use auditory_acquisition::store::{ExportFormat, JsonFileStore, StoreAxes};
use auditory_acquisition::{
    init_logging, AcquisitionCoordinator, AppConfig, ResponseStore, RunReport, StimulusComponent,
};
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "acq_cli",
    about = "Run acquisition and calibration scenarios against a loopback device"
)]
struct Cli {
    /// JSON configuration file (defaults are used when missing)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Gain of the simulated speaker to microphone path
    #[arg(long, default_value_t = 1.0)]
    gain: f64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Present a tone grid and export every recorded trace
    ToneProtocol {
        #[arg(long, value_delimiter = ',', required = true)]
        frequencies: Vec<f64>,
        #[arg(long, value_delimiter = ',', required = true)]
        intensities: Vec<f64>,
        /// Tone duration in seconds
        #[arg(long, default_value_t = 0.02)]
        duration: f64,
        #[arg(long, default_value_t = 0.002)]
        risefall: f64,
        #[arg(long)]
        reps: Option<usize>,
        /// Export destination for the response store
        #[arg(long)]
        output: PathBuf,
    },
    /// Play a sweep repeatedly and compute a broadband calibration curve
    CalibrateBroadband {
        #[arg(long, default_value_t = 5_000.0)]
        start: f64,
        /// At most half the input and generation rates
        #[arg(long, default_value_t = 20_000.0)]
        stop: f64,
        #[arg(long, default_value_t = 0.2)]
        duration: f64,
        #[arg(long)]
        reps: Option<usize>,
        /// Durable store receiving the calibration group
        #[arg(long)]
        durable: PathBuf,
        /// Keep the calibration group instead of discarding it
        #[arg(long)]
        save: bool,
    },
    /// Present pure tones and compute a tone-curve calibration
    ToneCurve {
        #[arg(long, value_delimiter = ',', required = true)]
        frequencies: Vec<f64>,
        #[arg(long, value_delimiter = ',', required = true)]
        intensities: Vec<f64>,
        #[arg(long, default_value_t = 0.2)]
        duration: f64,
        #[arg(long)]
        reps: Option<usize>,
    },
}

#[derive(Serialize)]
struct CurveSummary {
    run: RunReport,
    record: CalibrationRecord,
    saved_as: Option<String>,
}

fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = cli
        .config
        .as_ref()
        .map(AppConfig::load_from_file)
        .unwrap_or_default();

    match cli.command {
        Commands::ToneProtocol {
            frequencies,
            intensities,
            duration,
            risefall,
            reps,
            output,
        } => {
            apply_reps(&mut config, reps);
            run_tone_protocol(
                &config,
                cli.gain,
                &frequencies,
                &intensities,
                duration,
                risefall,
                &output,
            )
        }
        Commands::CalibrateBroadband {
            start,
            stop,
            duration,
            reps,
            durable,
            save,
        } => {
            apply_reps(&mut config, reps);
            run_broadband(&config, cli.gain, start, stop, duration, &durable, save)
        }
        Commands::ToneCurve {
            frequencies,
            intensities,
            duration,
            reps,
        } => {
            apply_reps(&mut config, reps);
            run_tone_curve(&config, cli.gain, &frequencies, &intensities, duration)
        }
    }
}

fn apply_reps(config: &mut AppConfig, reps: Option<usize>) {
    if let Some(reps) = reps {
        config.acquisition.repetitions = reps;
    }
}

fn coordinator(config: &AppConfig, gain: f64) -> AcquisitionCoordinator {
    let device = LoopbackDevice::from_config(&config.acquisition).with_gain(gain);
    AcquisitionCoordinator::new(config, Box::new(device))
}

fn tone_grid(
    frequencies: &[f64],
    intensities: &[f64],
    duration: f64,
    risefall: f64,
) -> Vec<StimulusComponent> {
    frequencies
        .iter()
        .flat_map(|&f| {
            intensities
                .iter()
                .map(move |&db| StimulusComponent::pure_tone(f, duration, db, risefall))
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_tone_protocol(
    config: &AppConfig,
    gain: f64,
    frequencies: &[f64],
    intensities: &[f64],
    duration: f64,
    risefall: f64,
    output: &Path,
) -> Result<()> {
    let acq = &config.acquisition;
    let axes = StoreAxes {
        frequencies: frequencies.to_vec(),
        intensities: intensities.to_vec(),
        repetitions: acq.repetitions,
        duration,
        sample_rate: acq.input_rate,
    };
    let store = Arc::new(ResponseStore::new("tone_protocol", axes));
    let samples = (acq.window * acq.input_rate).round() as usize;
    store
        .init_data("segment_0", 4, Some(samples))
        .context("failed to allocate trace dataset")?;

    let mut coordinator = coordinator(config, gain);
    coordinator.set_protocol(tone_grid(frequencies, intensities, duration, risefall));
    coordinator.setup(acq.interval)?;
    let outcome = coordinator
        .run(ProtocolSink::new(Arc::clone(&store), "segment_0"))?
        .join()?;
    let report = outcome.result?;

    store
        .export(output, ExportFormat::Json)
        .with_context(|| format!("failed to export to {}", output.display()))?;
    print_json(&report)
}

fn run_broadband(
    config: &AppConfig,
    gain: f64,
    start: f64,
    stop: f64,
    duration: f64,
    durable_path: &Path,
    save: bool,
) -> Result<()> {
    if start >= stop {
        bail!("sweep start {} Hz must be below stop {} Hz", start, stop);
    }
    let acq = &config.acquisition;
    let nyquist = acq.input_rate.min(config.synthesis.generation_rate) / 2.0;
    if stop > nyquist {
        bail!(
            "sweep stop {} Hz is above the {} Hz Nyquist frequency of the run",
            stop,
            nyquist
        );
    }
    let cal = &config.calibration;
    let reference = CalibrationReference::new(cal.calf, cal.caldb, cal.calv);

    let mut durable = JsonFileStore::open(durable_path)
        .with_context(|| format!("failed to open {}", durable_path.display()))?;
    let samples = (acq.window * acq.input_rate).round() as usize;
    let dataset =
        CalibrationDataset::begin(&mut durable, acq.repetitions, samples, acq.input_rate)?;

    let mut coordinator = coordinator(config, gain);
    coordinator.set_protocol(vec![StimulusComponent::fm_sweep(
        start, stop, duration, cal.caldb, 0.0,
    )]);
    coordinator.setup(acq.interval)?;
    let outcome = coordinator.run(BroadbandSink::new(dataset))?.join()?;
    let report = outcome.result?;

    let (dataset, stimulus) = outcome.sink.into_parts();
    let stimulus = stimulus.ok_or_else(|| anyhow!("no sweep was played"))?;
    let processor = CalibrationProcessor::from_config(cal);
    let record = processor.compute(
        CalibrationInput::Broadband {
            stimulus: &stimulus,
            stimulus_rate: config.synthesis.generation_rate,
            responses: dataset.responses(),
            response_rate: acq.input_rate,
            frange: (start, stop),
        },
        reference,
    )?;
    let saved_as = dataset.finish(&mut durable, save, Some(&record))?;

    print_json(&CurveSummary {
        run: report,
        record,
        saved_as,
    })
}

fn run_tone_curve(
    config: &AppConfig,
    gain: f64,
    frequencies: &[f64],
    intensities: &[f64],
    duration: f64,
) -> Result<()> {
    let acq = &config.acquisition;
    let cal = &config.calibration;
    let reference = CalibrationReference::new(cal.calf, cal.caldb, cal.calv);
    let processor = CalibrationProcessor::from_config(cal);
    let dataset = processor.tone_curve_dataset(reference, acq.repetitions);

    let mut coordinator = coordinator(config, gain);
    coordinator.set_protocol(tone_grid(frequencies, intensities, duration, 0.0));
    coordinator.setup(acq.interval)?;
    let outcome = coordinator
        .run(ToneCurveSink::new(dataset, acq.input_rate))?
        .join()?;
    let report = outcome.result?;

    let dataset = outcome.sink.into_dataset();
    let record = processor.compute(CalibrationInput::ToneCurve(&dataset), reference)?;
    print_json(&CurveSummary {
        run: report,
        record,
        saved_as: None,
    })
}

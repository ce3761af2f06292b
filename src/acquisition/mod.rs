//! Acquisition run coordinator.
//!
//! A run presents every stimulus of the protocol `repetitions` times. Each
//! presentation is synthesized, played through the [`PlayRecord`] device
//! while the response is recorded, and handed to a [`ResponseSink`]. Runs
//! execute on their own thread; progress is reported on the coordinator's
//! [`NotificationHub`].
//!
//! State machine:
//! `Idle -> Initializing -> Presenting(i) -> Finalizing -> Idle`, with
//! `Halting` entered when a halt request is seen between presentations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationRecord;
use crate::config::{AcquisitionConfig, AppConfig};
use crate::device::PlayRecord;
use crate::error::{log_acquisition_error, log_stimulus_error, AcquisitionError, ErrorCode};
use crate::managers::{AcquisitionEvent, CalibrationManager, NotificationHub};
use crate::stimulus::{StimulusComponent, StimulusKind, SynthesisContext, Synthesizer};

pub mod sink;

pub use sink::{BroadbandSink, ProtocolSink, ResponseSink, ToneCurveSink};

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Initializing,
    Presenting(usize),
    Finalizing,
    Halting,
}

/// Summary published on `finished` and returned from [`RunHandle::join`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Presentations whose response reached the sink
    pub completed: usize,
    /// Presentations planned by `setup`
    pub total: usize,
    pub halted: bool,
    /// Ended by an unrecoverable device failure
    pub fatal: bool,
    pub warnings: usize,
}

/// One planned play/record cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Presentation {
    pub index: usize,
    pub component: StimulusComponent,
    pub repetition: usize,
}

impl Presentation {
    /// Frequency axis value of this presentation
    pub fn frequency(&self) -> f64 {
        self.component.nominal_frequency()
    }

    /// Intensity axis value of this presentation
    pub fn intensity(&self) -> f64 {
        self.component.intensity
    }
}

#[derive(Debug, Clone)]
struct RunPlan {
    presentations: Vec<Presentation>,
    interval: Duration,
}

/// Everything the run thread needs, moved into it by `run()`
struct RunContext {
    plan: RunPlan,
    config: AppConfig,
    synthesizer: Arc<Synthesizer>,
    calibration: Arc<CalibrationManager>,
    hub: Arc<NotificationHub>,
    state: Arc<Mutex<RunState>>,
    halt: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    device_slot: Arc<Mutex<Option<Box<dyn PlayRecord>>>>,
}

/// Sink and result of a finished run
pub struct RunOutcome<S> {
    pub sink: S,
    pub result: Result<RunReport, AcquisitionError>,
}

/// Handle on a run thread
pub struct RunHandle<S> {
    handle: JoinHandle<RunOutcome<S>>,
}

impl<S> RunHandle<S> {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to end
    ///
    /// # Errors
    /// `RunPanicked` if the run thread panicked; the sink is lost then.
    pub fn join(self) -> Result<RunOutcome<S>, AcquisitionError> {
        self.handle.join().map_err(|_| {
            let err = AcquisitionError::RunPanicked;
            log_acquisition_error(&err, "join");
            err
        })
    }
}

/// Drives acquisition runs
///
/// # Example
/// ```ignore
/// let mut coordinator = AcquisitionCoordinator::new(&config, Box::new(device));
/// coordinator.set_protocol(vec![StimulusComponent::pure_tone(5_000.0, 0.02, 60.0, 0.002)]);
/// coordinator.setup(0.0)?;
/// let handle = coordinator.run(ProtocolSink::new(store, "segment_0"))?;
/// let outcome = handle.join()?;
/// ```
pub struct AcquisitionCoordinator {
    config: AppConfig,
    protocol: Vec<StimulusComponent>,
    plan: Option<RunPlan>,
    synthesizer: Arc<Synthesizer>,
    calibration: Arc<CalibrationManager>,
    hub: Arc<NotificationHub>,
    state: Arc<Mutex<RunState>>,
    halt: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    device_slot: Arc<Mutex<Option<Box<dyn PlayRecord>>>>,
}

impl AcquisitionCoordinator {
    pub fn new(config: &AppConfig, device: Box<dyn PlayRecord>) -> Self {
        let synthesizer = Synthesizer::new(config.synthesis.amplitude_policy);
        Self::with_synthesizer(config, device, synthesizer)
    }

    pub fn with_synthesizer(
        config: &AppConfig,
        device: Box<dyn PlayRecord>,
        synthesizer: Synthesizer,
    ) -> Self {
        Self {
            config: config.clone(),
            protocol: Vec::new(),
            plan: None,
            synthesizer: Arc::new(synthesizer),
            calibration: Arc::new(CalibrationManager::new()),
            hub: Arc::new(NotificationHub::new()),
            state: Arc::new(Mutex::new(RunState::Idle)),
            halt: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            device_slot: Arc::new(Mutex::new(Some(device))),
        }
    }

    pub fn hub(&self) -> Arc<NotificationHub> {
        Arc::clone(&self.hub)
    }

    pub fn calibration(&self) -> Arc<CalibrationManager> {
        Arc::clone(&self.calibration)
    }

    pub fn synthesizer(&self) -> Arc<Synthesizer> {
        Arc::clone(&self.synthesizer)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Replace the stimuli presented by the next run
    ///
    /// Invalidates any previous `setup`.
    pub fn set_protocol(&mut self, protocol: Vec<StimulusComponent>) {
        self.protocol = protocol;
        self.plan = None;
    }

    pub fn protocol(&self) -> &[StimulusComponent] {
        &self.protocol
    }

    pub fn set_repetitions(&mut self, repetitions: usize) {
        self.config.acquisition.repetitions = repetitions;
        self.plan = None;
    }

    pub fn state(&self) -> RunState {
        self.state.lock().map(|s| *s).unwrap_or(RunState::Idle)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Validate the protocol and plan the next run
    ///
    /// `interval` is the minimum time in seconds between presentation starts.
    /// Returns the number of planned presentations.
    ///
    /// # Errors
    /// - `AlreadyRunning` while a run is in progress
    /// - `Configuration` for an empty protocol, zero repetitions, bad rates or
    ///   window, duplicate (frequency, intensity) stimuli, or unnamed channels
    pub fn setup(&mut self, interval: f64) -> Result<usize, AcquisitionError> {
        if self.is_running() {
            return Err(AcquisitionError::AlreadyRunning);
        }
        match self.plan_run(interval) {
            Ok(plan) => {
                let total = plan.presentations.len();
                self.plan = Some(plan);
                // drop buffers of the previous protocol
                self.synthesizer.clear_cache();
                self.set_state(RunState::Initializing)?;
                tracing::info!(
                    "[Coordinator] Planned {} presentations ({} stimuli x {} repetitions)",
                    total,
                    self.protocol.len(),
                    self.config.acquisition.repetitions
                );
                Ok(total)
            }
            Err(err) => {
                log_acquisition_error(&err, "setup");
                Err(err)
            }
        }
    }

    fn plan_run(&self, interval: f64) -> Result<RunPlan, AcquisitionError> {
        let acq = &self.config.acquisition;
        let reps = acq.repetitions;
        Self::validate(acq, self.config.synthesis.generation_rate, interval)?;

        if self.protocol.is_empty() {
            return Err(AcquisitionError::Configuration {
                reason: "protocol has no stimuli".to_string(),
            });
        }
        for (i, a) in self.protocol.iter().enumerate() {
            if let Some(b) = self.protocol[i + 1..].iter().find(|b| {
                b.nominal_frequency() == a.nominal_frequency() && b.intensity == a.intensity
            }) {
                return Err(AcquisitionError::Configuration {
                    reason: format!(
                        "duplicate stimulus at {} Hz, {} dB ({} and {})",
                        b.nominal_frequency(),
                        b.intensity,
                        a.name(),
                        b.name()
                    ),
                });
            }
        }

        let (output, input) = (acq.output_channel.clone(), acq.input_channel.clone());
        match self.lock_device()?.as_mut() {
            Some(device) => device.configure(&output, &input)?,
            None => return Err(AcquisitionError::AlreadyRunning),
        }

        let presentations = self
            .protocol
            .iter()
            .flat_map(|component| (0..reps).map(move |rep| (component, rep)))
            .enumerate()
            .map(|(index, (component, repetition))| Presentation {
                index,
                component: component.clone(),
                repetition,
            })
            .collect();

        Ok(RunPlan {
            presentations,
            interval: Duration::from_secs_f64(interval),
        })
    }

    fn validate(
        acq: &AcquisitionConfig,
        generation_rate: f64,
        interval: f64,
    ) -> Result<(), AcquisitionError> {
        let checks = [
            (acq.repetitions > 0, "repetitions must be at least 1"),
            (
                generation_rate.is_finite() && generation_rate > 0.0,
                "generation rate must be positive",
            ),
            (
                acq.input_rate.is_finite() && acq.input_rate > 0.0,
                "input rate must be positive",
            ),
            (
                acq.window.is_finite() && acq.window > 0.0,
                "recording window must be positive",
            ),
            (
                interval.is_finite() && interval >= 0.0,
                "interval must be non-negative",
            ),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, reason)) => Err(AcquisitionError::Configuration {
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Start the planned run on its own thread
    ///
    /// # Errors
    /// - `NotConfigured` without a successful `setup` since the last run
    /// - `AlreadyRunning` while another run holds the device
    pub fn run<S: ResponseSink>(&mut self, sink: S) -> Result<RunHandle<S>, AcquisitionError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AcquisitionError::AlreadyRunning);
        }
        let Some(plan) = self.plan.take() else {
            self.running.store(false, Ordering::SeqCst);
            return Err(AcquisitionError::NotConfigured);
        };

        let device = match self.lock_device() {
            Ok(mut slot) => slot.take(),
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };
        let Some(device) = device else {
            self.running.store(false, Ordering::SeqCst);
            return Err(AcquisitionError::AlreadyRunning);
        };

        self.halt.store(false, Ordering::SeqCst);
        let ctx = RunContext {
            plan,
            config: self.config.clone(),
            synthesizer: Arc::clone(&self.synthesizer),
            calibration: Arc::clone(&self.calibration),
            hub: Arc::clone(&self.hub),
            state: Arc::clone(&self.state),
            halt: Arc::clone(&self.halt),
            running: Arc::clone(&self.running),
            device_slot: Arc::clone(&self.device_slot),
        };

        let handle = thread::Builder::new()
            .name("acquisition-run".to_string())
            .spawn(move || ctx.execute(device, sink))
            .map_err(|err| {
                self.running.store(false, Ordering::SeqCst);
                AcquisitionError::Configuration {
                    reason: format!("failed to spawn run thread: {}", err),
                }
            })?;
        Ok(RunHandle { handle })
    }

    /// Ask the running acquisition to stop at the next presentation boundary
    pub fn halt(&self) {
        if !self.halt.swap(true, Ordering::SeqCst) {
            tracing::info!("[Coordinator] Halt requested");
        }
    }

    fn set_state(&self, state: RunState) -> Result<(), AcquisitionError> {
        *self
            .state
            .lock()
            .map_err(|_| AcquisitionError::LockPoisoned {
                component: "run_state".to_string(),
            })? = state;
        Ok(())
    }

    fn lock_device(
        &self,
    ) -> Result<MutexGuard<'_, Option<Box<dyn PlayRecord>>>, AcquisitionError> {
        self.device_slot
            .lock()
            .map_err(|_| AcquisitionError::LockPoisoned {
                component: "device".to_string(),
            })
    }
}

/// How one presentation ended
enum Step {
    Collected,
    Skipped,
    Fatal,
}

impl RunContext {
    fn execute<S: ResponseSink>(self, mut device: Box<dyn PlayRecord>, mut sink: S) -> RunOutcome<S> {
        let result = self.present_all(device.as_mut(), &mut sink);

        if let Ok(mut slot) = self.device_slot.lock() {
            *slot = Some(device);
        }
        self.set_state(RunState::Idle);
        self.running.store(false, Ordering::SeqCst);

        if let Err(err) = &result {
            log_acquisition_error(err, "run");
        }
        RunOutcome { sink, result }
    }

    fn present_all<S: ResponseSink>(
        &self,
        device: &mut dyn PlayRecord,
        sink: &mut S,
    ) -> Result<RunReport, AcquisitionError> {
        let presentations = &self.plan.presentations;
        let mut report = RunReport {
            total: presentations.len(),
            ..RunReport::default()
        };
        let mut last_start: Option<Instant> = None;

        for presentation in presentations {
            if let Some(start) = last_start {
                let next = start + self.plan.interval;
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                }
            }
            if self.halt.load(Ordering::SeqCst) {
                self.set_state(RunState::Halting);
                report.halted = true;
                tracing::info!(
                    "[Coordinator] Halted after {} of {} presentations",
                    report.completed,
                    report.total
                );
                break;
            }

            self.set_state(RunState::Presenting(presentation.index));
            last_start = Some(Instant::now());
            self.hub.publish(AcquisitionEvent::CurrentRep {
                presentation: presentation.index,
                repetition: presentation.repetition,
                total: report.total,
            });

            match self.present(device, presentation, sink)? {
                Step::Collected => report.completed += 1,
                Step::Skipped => report.warnings += 1,
                Step::Fatal => {
                    report.fatal = true;
                    break;
                }
            }
        }

        self.set_state(RunState::Finalizing);
        if !report.fatal {
            sink.finish(&report)?;
            self.hub.publish(AcquisitionEvent::Finished(report));
        }
        tracing::info!(
            "[Coordinator] Run ended: {}/{} collected, halted={}, fatal={}",
            report.completed,
            report.total,
            report.halted,
            report.fatal
        );
        Ok(report)
    }

    fn present<S: ResponseSink>(
        &self,
        device: &mut dyn PlayRecord,
        presentation: &Presentation,
        sink: &mut S,
    ) -> Result<Step, AcquisitionError> {
        let rate = self.config.synthesis.generation_rate;
        let stimulus = match self
            .synthesis_context(&presentation.component)
            .and_then(|ctx| {
                self.synthesizer
                    .synthesize(&presentation.component, &ctx)
                    .map_err(AcquisitionError::from)
            }) {
            Ok(stimulus) => stimulus,
            Err(AcquisitionError::Stimulus(err)) => {
                log_stimulus_error(&err, "synthesize");
                self.warn(presentation, err.code(), err.message());
                return Ok(Step::Skipped);
            }
            Err(err) => return Err(err),
        };

        let response = match self.play(device, &stimulus, rate) {
            Ok(response) => response,
            Err(err) if err.is_fatal() => {
                log_acquisition_error(&err, "play_and_record");
                self.hub.publish(AcquisitionEvent::RunError {
                    presentation: presentation.index,
                    code: err.code(),
                    message: err.message(),
                });
                return Ok(Step::Fatal);
            }
            Err(err) => {
                self.warn(presentation, err.code(), err.message());
                return Ok(Step::Skipped);
            }
        };

        if let Err(err) = sink.accept(presentation, &stimulus, &response, &self.hub) {
            self.hub.publish(AcquisitionEvent::RunError {
                presentation: presentation.index,
                code: err.code(),
                message: err.message(),
            });
            return Err(err);
        }

        let input_rate = self.config.acquisition.input_rate;
        let times = (0..response.len()).map(|k| k as f64 / input_rate).collect();
        self.hub.publish(AcquisitionEvent::ResponseCollected {
            presentation: presentation.index,
            frequency: presentation.frequency(),
            intensity: presentation.intensity(),
            repetition: presentation.repetition,
            times: Arc::new(times),
            response: Arc::new(response),
        });
        Ok(Step::Collected)
    }

    /// One play/record cycle, retried once after a transient failure
    ///
    /// A device that reports itself disconnected after the retry failed is
    /// treated as lost, whatever its error said.
    fn play(
        &self,
        device: &mut dyn PlayRecord,
        stimulus: &[f64],
        rate: f64,
    ) -> Result<Vec<f64>, AcquisitionError> {
        let first = match device.play_and_record(stimulus, rate) {
            Err(err) if !err.is_fatal() => err,
            result => return result,
        };
        tracing::warn!("[Coordinator] {}; reconnecting and retrying once", first);
        match device
            .reconnect()
            .and_then(|()| device.play_and_record(stimulus, rate))
        {
            Err(err) if !err.is_fatal() && !device.is_connected() => {
                Err(AcquisitionError::Hardware {
                    details: format!("device disconnected after retry: {}", err.message()),
                    fatal: true,
                })
            }
            result => result,
        }
    }

    /// Context for one component, with the active calibration folded in
    fn synthesis_context(
        &self,
        component: &StimulusComponent,
    ) -> Result<SynthesisContext, AcquisitionError> {
        let cal = &self.config.calibration;
        let correction = self
            .calibration
            .active()?
            .map(|record| calibration_correction(&record, component))
            .unwrap_or(0.0);
        Ok(self.calibration.synthesis_context(
            self.config.synthesis.generation_rate,
            self.config.synthesis.attenuation + correction,
            cal.caldb,
            cal.calv,
        )?)
    }

    fn warn(&self, presentation: &Presentation, code: i32, message: String) {
        tracing::warn!(
            "[Coordinator] Presentation {} skipped: {}",
            presentation.index,
            message
        );
        self.hub.publish(AcquisitionEvent::Warning {
            presentation: presentation.index,
            code,
            message,
        });
    }

    fn set_state(&self, state: RunState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }
}

/// dB added to a tone's attenuation under `record`
fn calibration_correction(record: &CalibrationRecord, component: &StimulusComponent) -> f64 {
    match component.kind {
        StimulusKind::PureTone { frequency } => record.correction_at(frequency),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationReference, CurveMode};
    use crate::device::{Fault, LoopbackDevice};
    use crate::managers::ChannelName;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.synthesis.generation_rate = 100_000.0;
        config.acquisition.input_rate = 10_000.0;
        config.acquisition.window = 0.01;
        config
    }

    fn tone(frequency: f64, intensity: f64) -> StimulusComponent {
        StimulusComponent::pure_tone(frequency, 0.01, intensity, 0.0)
    }

    /// Records only how many responses it saw
    #[derive(Default)]
    struct CountingSink {
        seen: Vec<(usize, usize)>,
        finished: bool,
    }

    impl ResponseSink for CountingSink {
        fn accept(
            &mut self,
            presentation: &Presentation,
            _stimulus: &Arc<Vec<f64>>,
            response: &[f64],
            _hub: &NotificationHub,
        ) -> Result<(), AcquisitionError> {
            self.seen.push((presentation.index, response.len()));
            Ok(())
        }

        fn finish(&mut self, _report: &RunReport) -> Result<(), AcquisitionError> {
            self.finished = true;
            Ok(())
        }
    }

    #[test]
    fn test_run_before_setup() {
        let config = config();
        let device = LoopbackDevice::from_config(&config.acquisition);
        let mut coordinator = AcquisitionCoordinator::new(&config, Box::new(device));
        coordinator.set_protocol(vec![tone(1_000.0, 60.0)]);
        assert!(matches!(
            coordinator.run(CountingSink::default()),
            Err(AcquisitionError::NotConfigured)
        ));
        assert!(!coordinator.is_running());
    }

    #[test]
    fn test_setup_validation() {
        let config = config();
        let device = LoopbackDevice::from_config(&config.acquisition);
        let mut coordinator = AcquisitionCoordinator::new(&config, Box::new(device));
        assert!(matches!(
            coordinator.setup(0.0),
            Err(AcquisitionError::Configuration { .. })
        ));

        coordinator.set_protocol(vec![tone(1_000.0, 60.0), tone(1_000.0, 60.0)]);
        assert!(matches!(
            coordinator.setup(0.0),
            Err(AcquisitionError::Configuration { .. })
        ));

        coordinator.set_protocol(vec![tone(1_000.0, 60.0), tone(2_000.0, 60.0)]);
        assert!(matches!(
            coordinator.setup(-1.0),
            Err(AcquisitionError::Configuration { .. })
        ));

        coordinator.set_repetitions(3);
        assert_eq!(coordinator.setup(0.0).unwrap(), 6);
        assert_eq!(coordinator.state(), RunState::Initializing);
    }

    #[test]
    fn test_run_collects_every_presentation() {
        let config = config();
        let device = LoopbackDevice::from_config(&config.acquisition);
        let mut coordinator = AcquisitionCoordinator::new(&config, Box::new(device));
        coordinator.set_protocol(vec![tone(1_000.0, 60.0), tone(2_000.0, 60.0)]);
        coordinator.set_repetitions(2);
        coordinator.setup(0.0).unwrap();

        let mut finished = coordinator.hub().receiver(ChannelName::Finished);
        let outcome = coordinator
            .run(CountingSink::default())
            .unwrap()
            .join()
            .unwrap();
        let report = outcome.result.unwrap();

        assert_eq!(report.completed, 4);
        assert_eq!(report.total, 4);
        assert!(!report.halted);
        assert!(outcome.sink.finished);
        assert_eq!(
            outcome.sink.seen,
            vec![(0, 100), (1, 100), (2, 100), (3, 100)]
        );
        assert_eq!(
            finished.recv_blocking(),
            Some(AcquisitionEvent::Finished(report))
        );
        assert_eq!(coordinator.state(), RunState::Idle);
        // repetitions reuse the two cached tones
        assert_eq!(coordinator.synthesizer().cached_len(), 2);
        // device is back and the coordinator can be set up again
        assert_eq!(coordinator.setup(0.0).unwrap(), 4);
        assert_eq!(coordinator.synthesizer().cached_len(), 0);
    }

    #[test]
    fn test_transient_fault_is_retried() {
        let config = config();
        let device =
            LoopbackDevice::from_config(&config.acquisition).with_fault(0, Fault::Transient);
        let mut coordinator = AcquisitionCoordinator::new(&config, Box::new(device));
        coordinator.set_protocol(vec![tone(1_000.0, 60.0)]);
        coordinator.setup(0.0).unwrap();

        let mut warnings = coordinator.hub().receiver(ChannelName::Warning);
        let outcome = coordinator
            .run(CountingSink::default())
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(outcome.result.unwrap().completed, 1);
        assert!(warnings.drain().is_empty());
    }

    /// Fails with non-fatal errors and reports itself unplugged
    struct UnpluggedDevice;

    impl PlayRecord for UnpluggedDevice {
        fn configure(&mut self, _output: &str, _input: &str) -> Result<(), AcquisitionError> {
            Ok(())
        }

        fn play_and_record(
            &mut self,
            _buffer: &[f64],
            _sample_rate: f64,
        ) -> Result<Vec<f64>, AcquisitionError> {
            Err(AcquisitionError::Hardware {
                details: "no response".to_string(),
                fatal: false,
            })
        }

        fn is_connected(&self) -> bool {
            false
        }

        fn reconnect(&mut self) -> Result<(), AcquisitionError> {
            Err(AcquisitionError::Hardware {
                details: "reconnect failed".to_string(),
                fatal: false,
            })
        }
    }

    #[test]
    fn test_failed_retry_on_disconnected_device_is_fatal() {
        let config = config();
        let mut coordinator = AcquisitionCoordinator::new(&config, Box::new(UnpluggedDevice));
        coordinator.set_protocol(vec![tone(1_000.0, 60.0), tone(2_000.0, 60.0)]);
        coordinator.setup(0.0).unwrap();

        let mut warnings = coordinator.hub().receiver(ChannelName::Warning);
        let mut errors = coordinator.hub().receiver(ChannelName::RunError);
        let outcome = coordinator
            .run(CountingSink::default())
            .unwrap()
            .join()
            .unwrap();
        let report = outcome.result.unwrap();

        assert!(report.fatal);
        assert_eq!((report.completed, report.warnings), (0, 0));
        assert!(outcome.sink.seen.is_empty());
        assert!(warnings.drain().is_empty());
        assert!(matches!(
            errors.try_recv(),
            Some(AcquisitionEvent::RunError { presentation: 0, .. })
        ));
    }

    #[test]
    fn test_calibration_correction_only_for_tones() {
        let record = CalibrationRecord::new(
            CurveMode::ToneCurve,
            vec![6.0, 0.0],
            vec![5_000.0, 20_000.0],
            (5_000.0, 20_000.0),
            CalibrationReference::new(20_000.0, 100.0, 0.1),
        )
        .unwrap();
        assert_eq!(calibration_correction(&record, &tone(5_000.0, 60.0)), 6.0);
        let noise = StimulusComponent::white_noise(0.01, 60.0, 0.0);
        assert_eq!(calibration_correction(&record, &noise), 0.0);
    }
}

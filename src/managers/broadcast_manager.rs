// NotificationHub: named tokio channels for acquisition events
// Single Responsibility: channel lifecycle, listener threads and shutdown

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::acquisition::RunReport;
use crate::analysis::Spectrum;
use crate::error::AcquisitionError;

/// Event channel names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelName {
    ResponseCollected,
    AverageResponse,
    CalibrationResponseCollected,
    CurrentRep,
    Warning,
    Finished,
    RunError,
}

impl ChannelName {
    pub const ALL: [ChannelName; 7] = [
        ChannelName::ResponseCollected,
        ChannelName::AverageResponse,
        ChannelName::CalibrationResponseCollected,
        ChannelName::CurrentRep,
        ChannelName::Warning,
        ChannelName::Finished,
        ChannelName::RunError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelName::ResponseCollected => "response_collected",
            ChannelName::AverageResponse => "average_response",
            ChannelName::CalibrationResponseCollected => "calibration_response_collected",
            ChannelName::CurrentRep => "current_rep",
            ChannelName::Warning => "warning",
            ChannelName::Finished => "finished",
            ChannelName::RunError => "run_error",
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelName {
    type Err = AcquisitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| AcquisitionError::Configuration {
                reason: format!("unknown channel '{}'", s),
            })
    }
}

/// Payloads published by acquisition runs
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    /// Raw response of one presentation
    ResponseCollected {
        presentation: usize,
        frequency: f64,
        intensity: f64,
        repetition: usize,
        /// Sample times in seconds
        times: Arc<Vec<f64>>,
        response: Arc<Vec<f64>>,
    },
    /// Tone-curve mean once every repetition of a presentation is in
    AverageResponse {
        frequency: f64,
        intensity: f64,
        result_db: f64,
    },
    /// Tone-curve spectrum of one response
    CalibrationResponseCollected {
        spectrum: Arc<Spectrum>,
        frequency: f64,
        vamp: f64,
    },
    /// Presentation about to start
    CurrentRep {
        presentation: usize,
        repetition: usize,
        total: usize,
    },
    /// Non-fatal problem; the run continues
    Warning {
        presentation: usize,
        code: i32,
        message: String,
    },
    /// Run ended, normally or by halt
    Finished(RunReport),
    /// Run ended by a fatal error
    RunError {
        presentation: usize,
        code: i32,
        message: String,
    },
}

impl AcquisitionEvent {
    pub fn channel(&self) -> ChannelName {
        match self {
            AcquisitionEvent::ResponseCollected { .. } => ChannelName::ResponseCollected,
            AcquisitionEvent::AverageResponse { .. } => ChannelName::AverageResponse,
            AcquisitionEvent::CalibrationResponseCollected { .. } => {
                ChannelName::CalibrationResponseCollected
            }
            AcquisitionEvent::CurrentRep { .. } => ChannelName::CurrentRep,
            AcquisitionEvent::Warning { .. } => ChannelName::Warning,
            AcquisitionEvent::Finished(_) => ChannelName::Finished,
            AcquisitionEvent::RunError { .. } => ChannelName::RunError,
        }
    }
}

#[derive(Debug, Clone)]
enum Envelope {
    Event(AcquisitionEvent),
    /// Unblocks a listener so it re-checks its shutdown flag
    Wake,
}

struct Listener {
    shutdown: Arc<AtomicBool>,
    /// Sender feeding only this listener's queue
    wake: mpsc::UnboundedSender<Envelope>,
    handle: JoinHandle<()>,
}

struct Channel {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Envelope>>>,
    listener: Mutex<Option<Listener>>,
}

impl Channel {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
        }
    }

    fn attach(&self) -> mpsc::UnboundedReceiver<Envelope> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.senders().push(sender);
        receiver
    }

    fn senders(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<Envelope>>> {
        // A poisoned list still holds valid senders
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Receiver of one channel's events, for tools and tests
pub struct EventReceiver {
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl EventReceiver {
    /// Block until the next event; `None` once the hub is gone
    pub fn recv_blocking(&mut self) -> Option<AcquisitionEvent> {
        loop {
            match self.receiver.blocking_recv()? {
                Envelope::Event(event) => return Some(event),
                Envelope::Wake => continue,
            }
        }
    }

    /// Next event if one is queued
    pub fn try_recv(&mut self) -> Option<AcquisitionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(Envelope::Event(event)) => return Some(event),
                Ok(Envelope::Wake) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Every queued event, oldest first
    pub fn drain(&mut self) -> Vec<AcquisitionEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Fans each event name out to its subscribers
///
/// Single Responsibility: channel lifecycle and subscription
///
/// The run thread is the only producer. Each channel accepts at most one
/// callback listener at a time, served by its own thread; any number of raw
/// [`EventReceiver`]s may be attached as well. Every subscriber owns an
/// unbounded queue, so a slow consumer delays only itself and never loses
/// events. Events on one channel arrive in publication order; there is no
/// ordering across channels.
///
/// # Notes
/// - Receivers see events published after they were attached
/// - Dropped receivers are pruned on the next publish
/// - Dropping the hub stops every listener thread
pub struct NotificationHub {
    channels: HashMap<ChannelName, Channel>,
}

impl NotificationHub {
    pub fn new() -> Self {
        let channels = ChannelName::ALL
            .iter()
            .map(|&name| (name, Channel::new()))
            .collect();
        Self { channels }
    }

    fn channel(&self, name: ChannelName) -> &Channel {
        // every name is inserted by new()
        &self.channels[&name]
    }

    /// Publish an event on its channel
    ///
    /// Returns the number of subscribers that will see it.
    pub fn publish(&self, event: AcquisitionEvent) -> usize {
        let name = event.channel();
        let mut senders = self.channel(name).senders();
        senders.retain(|sender| sender.send(Envelope::Event(event.clone())).is_ok());
        if senders.is_empty() {
            tracing::trace!("[NotificationHub] No receivers on '{}'", name);
        }
        senders.len()
    }

    /// Attach a raw receiver to a channel
    pub fn receiver(&self, name: ChannelName) -> EventReceiver {
        EventReceiver {
            receiver: self.channel(name).attach(),
        }
    }

    /// Register `callback` as the listener of `name`
    ///
    /// The callback runs on a dedicated thread and receives every event
    /// published after this call. A previously registered listener on the
    /// same channel is stopped first.
    pub fn subscribe<F>(&self, name: ChannelName, mut callback: F) -> Result<(), AcquisitionError>
    where
        F: FnMut(AcquisitionEvent) + Send + 'static,
    {
        self.unsubscribe(name)?;

        let channel = self.channel(name);
        let (wake, mut receiver) = mpsc::unbounded_channel();
        channel.senders().push(wake.clone());
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name(format!("listener-{}", name))
            .spawn(move || {
                while let Some(envelope) = receiver.blocking_recv() {
                    if flag.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Envelope::Event(event) = envelope {
                        callback(event);
                    }
                }
            })
            .map_err(|err| AcquisitionError::Configuration {
                reason: format!("failed to spawn listener for '{}': {}", name, err),
            })?;

        let mut slot = channel
            .listener
            .lock()
            .map_err(|_| AcquisitionError::LockPoisoned {
                component: format!("listener:{}", name),
            })?;
        *slot = Some(Listener {
            shutdown,
            wake,
            handle,
        });
        tracing::debug!("[NotificationHub] Listener registered on '{}'", name);
        Ok(())
    }

    /// Stop the listener of `name`, if any, and wait for its thread
    ///
    /// Called from the listener's own callback, the thread is left to finish
    /// the callback and exit on its own. Returns whether a listener was
    /// registered.
    pub fn unsubscribe(&self, name: ChannelName) -> Result<bool, AcquisitionError> {
        let channel = self.channel(name);
        let listener = channel
            .listener
            .lock()
            .map_err(|_| AcquisitionError::LockPoisoned {
                component: format!("listener:{}", name),
            })?
            .take();

        let Some(listener) = listener else {
            return Ok(false);
        };
        listener.shutdown.store(true, Ordering::SeqCst);
        let _ = listener.wake.send(Envelope::Wake);
        drop(listener.wake);

        if listener.handle.thread().id() == thread::current().id() {
            tracing::debug!("[NotificationHub] Listener on '{}' removed itself", name);
            return Ok(true);
        }
        if listener.handle.join().is_err() {
            tracing::warn!("[NotificationHub] Listener on '{}' panicked", name);
        }
        tracing::debug!("[NotificationHub] Listener removed from '{}'", name);
        Ok(true)
    }

    pub fn has_listener(&self, name: ChannelName) -> bool {
        self.channel(name)
            .listener
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Stop every listener thread
    pub fn shutdown(&self) {
        for name in ChannelName::ALL {
            if let Err(err) = self.unsubscribe(name) {
                tracing::warn!("[NotificationHub] Failed to stop '{}': {}", name, err);
            }
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NotificationHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

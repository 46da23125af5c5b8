// Recorder - background worker producing readings until asked to stop
use super::measurement::{MeasurementError, MeasurementMethod, StopSignal};
use super::readings_queue::ReadingsSink;
use super::recorder_pool::{PoolSlot, RecorderPool};
use crate::domain::reading::{Measurement, Reading, RecordingMethod};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecorderError {
    #[error("a recorder named '{0}' is already running")]
    DuplicateIdentifier(String),
    #[error("recorder identifier must not be empty")]
    EmptyIdentifier,
    #[error("cannot run more than {max} recorders at once")]
    AtCapacity { max: usize },
    #[error("no running recorder named '{0}'")]
    NotFound(String),
    #[error("recorder '{0}' has already been started")]
    AlreadyStarted(String),
    #[error("could not acquire measurement resource: {0}")]
    Resource(String),
    #[error("the results writer is no longer accepting readings")]
    WriterClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderStatus {
    Idle,
    Running,
    StopRequested,
    Stopped { reason: Option<RecorderError> },
}

impl RecorderStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RecorderStatus::Idle => "idle",
            RecorderStatus::Running => "running",
            RecorderStatus::StopRequested => "stop_requested",
            RecorderStatus::Stopped { .. } => "stopped",
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, RecorderStatus::Stopped { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownSettings {
    /// How long to back off after a failed measurement.
    pub duration: Duration,
    /// How often the stop flag is checked while backing off.
    pub poll: Duration,
}

impl Default for CooldownSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
            poll: Duration::from_secs(1),
        }
    }
}

pub struct Recorder {
    identifier: String,
    method: RecordingMethod,
    status: watch::Sender<RecorderStatus>,
    stop: watch::Sender<bool>,
    measurer: Mutex<Option<Box<dyn MeasurementMethod>>>,
    sink: ReadingsSink,
    cooldown: CooldownSettings,
}

impl Recorder {
    pub fn new(
        identifier: impl Into<String>,
        measurer: Box<dyn MeasurementMethod>,
        sink: ReadingsSink,
        cooldown: CooldownSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            identifier: identifier.into(),
            method: measurer.method(),
            status: watch::Sender::new(RecorderStatus::Idle),
            stop: watch::Sender::new(false),
            measurer: Mutex::new(Some(measurer)),
            sink,
            cooldown,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn method(&self) -> RecordingMethod {
        self.method
    }

    pub fn status(&self) -> RecorderStatus {
        self.status.borrow().clone()
    }

    /// True from start until the loop has fully stopped, stop requests included.
    pub fn is_running(&self) -> bool {
        matches!(
            *self.status.borrow(),
            RecorderStatus::Running | RecorderStatus::StopRequested
        )
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<RecorderStatus> {
        self.status.subscribe()
    }

    /// Reserves a pool slot and spawns the recording loop. A recorder can only
    /// be started once.
    pub fn start(self: &Arc<Self>, pool: &RecorderPool) -> Result<JoinHandle<()>, RecorderError> {
        if *self.status.borrow() != RecorderStatus::Idle {
            return Err(RecorderError::AlreadyStarted(self.identifier.clone()));
        }
        let slot = pool.try_reserve()?;
        let measurer = self
            .measurer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| RecorderError::AlreadyStarted(self.identifier.clone()))?;

        self.status.send_replace(RecorderStatus::Running);
        info!(recorder = %self.identifier, method = %self.method, "recorder started");

        let recorder = Arc::clone(self);
        Ok(pool.spawn(async move { recorder.run(measurer, slot).await }))
    }

    /// Asks the loop to stop at its next checkpoint. Does nothing unless running.
    pub fn request_stop(&self) {
        let requested = self.status.send_if_modified(|status| {
            if *status == RecorderStatus::Running {
                *status = RecorderStatus::StopRequested;
                true
            } else {
                false
            }
        });
        if requested {
            self.stop.send_replace(true);
            info!(recorder = %self.identifier, "stopping recorder");
        }
    }

    /// Waits for the recorder to reach `Stopped`, returning `None` on timeout.
    pub async fn wait_stopped(&self, timeout: Duration) -> Option<RecorderStatus> {
        let mut rx = self.status.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(RecorderStatus::is_stopped)).await {
            Ok(Ok(status)) => Some(status.clone()),
            _ => None,
        }
    }

    async fn run(self: Arc<Self>, mut measurer: Box<dyn MeasurementMethod>, slot: PoolSlot) {
        let stop = StopSignal::new(self.stop.subscribe());

        // The hooks run inside catch_unwind so the task always gets to publish `Stopped`.
        let mut reason = match AssertUnwindSafe(measurer.prepare()).catch_unwind().await {
            Ok(Ok(())) => self.record_until_stopped(measurer.as_mut(), &stop).await.err(),
            Ok(Err(e)) => Some(RecorderError::Resource(e.to_string())),
            Err(panic) => Some(RecorderError::Resource(format!(
                "prepare panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };
        if let Err(panic) = AssertUnwindSafe(measurer.cleanup()).catch_unwind().await {
            let message = panic_message(panic.as_ref());
            error!(recorder = %self.identifier, method = %self.method, panic = %message, "cleanup panicked");
            reason.get_or_insert(RecorderError::Resource(format!("cleanup panicked: {message}")));
        }
        drop(slot);

        match &reason {
            Some(reason) => {
                error!(recorder = %self.identifier, method = %self.method, error = %reason, "recorder aborted")
            }
            None => info!(recorder = %self.identifier, "recorder has stopped"),
        }
        self.status.send_replace(RecorderStatus::Stopped { reason });
    }

    async fn record_until_stopped(
        &self,
        measurer: &mut dyn MeasurementMethod,
        stop: &StopSignal,
    ) -> Result<(), RecorderError> {
        while !stop.is_set() {
            let attempt = AssertUnwindSafe(measurer.take_measurement(stop))
                .catch_unwind()
                .await;

            let failure = match attempt {
                Ok(Ok(Measurement::Measured { download, upload })) => {
                    match Reading::now(download, upload, self.method) {
                        Ok(reading) => {
                            let outage = reading.is_outage();
                            self.sink
                                .publish(reading)
                                .await
                                .map_err(|_| RecorderError::WriterClosed)?;
                            // Zero readings are kept in the log; they mark when the line was down.
                            outage.then(|| "download and upload both reported zero".to_string())
                        }
                        Err(e) => Some(e.to_string()),
                    }
                }
                Ok(Ok(Measurement::Interrupted)) => None,
                Ok(Ok(Measurement::TransientFailure { reason })) => Some(reason),
                Ok(Err(MeasurementError::Resource(message))) => {
                    return Err(RecorderError::Resource(message));
                }
                Ok(Err(e)) => {
                    error!(recorder = %self.identifier, method = %self.method, error = %e, "measurement failed unexpectedly");
                    Some(e.to_string())
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(recorder = %self.identifier, method = %self.method, panic = %message, "measurement panicked");
                    Some(message)
                }
            };

            if let Some(reason) = failure {
                warn!(
                    recorder = %self.identifier,
                    method = %self.method,
                    %reason,
                    cooldown_secs = self.cooldown.duration.as_secs_f64(),
                    "connection may be down, cooling down"
                );
                if stop
                    .sleep_unless_stopped(self.cooldown.duration, self.cooldown.poll)
                    .await
                {
                    info!(recorder = %self.identifier, "interrupting cooldown");
                }
            }
        }
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic without a message".to_string())
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("identifier", &self.identifier)
            .field("method", &self.method)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

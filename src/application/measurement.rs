// Measurement method trait - the strategy a recorder runs each iteration
use crate::domain::reading::{Browser, Measurement, RecordingMethod};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum MeasurementError {
    /// Fatal to the recorder: a tool, driver or session could not be acquired.
    #[error("could not acquire measurement resource: {0}")]
    Resource(String),
    /// Treated as a transient failure by the recorder loop.
    #[error("unexpected measurement error: {0}")]
    Unexpected(String),
}

#[async_trait]
pub trait MeasurementMethod: Send {
    fn method(&self) -> RecordingMethod;

    /// Runs once before the first measurement.
    async fn prepare(&mut self) -> Result<(), MeasurementError> {
        Ok(())
    }

    /// Takes one measurement. Multi-phase methods should check `stop` between
    /// phases and return `Measurement::Interrupted` when it is set.
    async fn take_measurement(&mut self, stop: &StopSignal) -> Result<Measurement, MeasurementError>;

    /// Runs once after the loop exits, whatever the reason.
    async fn cleanup(&mut self) {}
}

/// Builds the measurement strategy for a recording method.
pub trait MeasurementFactory: Send + Sync {
    fn create(
        &self,
        method: RecordingMethod,
        browser: Option<Browser>,
    ) -> Result<Box<dyn MeasurementMethod>, MeasurementError>;
}

/// Read side of a recorder's cooperative stop flag.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleeps for `total`, re-checking the flag every `poll`. Returns true if
    /// the sleep was cut short by a stop request.
    pub async fn sleep_unless_stopped(&self, total: Duration, poll: Duration) -> bool {
        let poll = poll.max(Duration::from_millis(1));
        let deadline = Instant::now() + total;
        loop {
            if self.is_set() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }
}

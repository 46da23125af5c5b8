// Results writer - the single consumer that persists readings
use super::readings_log::{LogError, ReadingsLog};
use super::readings_queue::{Pop, ReadingsConsumer};
use crate::domain::reading::Reading;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterSettings {
    /// Longest the writer waits on an empty queue before re-checking for close.
    pub poll_timeout: Duration,
    /// Extra attempts made for a row after the first one fails.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(250),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("gave up writing a reading after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: LogError,
    },
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("results writer task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterState {
    Running { written: u64 },
    Draining { written: u64 },
    Finished { written: u64 },
    Failed { written: u64, reason: String },
}

impl WriterState {
    pub fn label(&self) -> &'static str {
        match self {
            WriterState::Running { .. } => "running",
            WriterState::Draining { .. } => "draining",
            WriterState::Finished { .. } => "finished",
            WriterState::Failed { .. } => "failed",
        }
    }

    pub fn written(&self) -> u64 {
        match self {
            WriterState::Running { written }
            | WriterState::Draining { written }
            | WriterState::Finished { written }
            | WriterState::Failed { written, .. } => *written,
        }
    }
}

/// A running results writer. Closing waits until every queued reading has
/// been written.
pub struct WriterSession {
    close: watch::Sender<bool>,
    state: watch::Receiver<WriterState>,
    handle: JoinHandle<Result<u64, WriterError>>,
}

impl WriterSession {
    pub fn spawn(log: Arc<dyn ReadingsLog>, settings: WriterSettings, queue: ReadingsConsumer) -> Self {
        let (close, close_rx) = watch::channel(false);
        let (state_tx, state) = watch::channel(WriterState::Running { written: 0 });
        let writer = ResultsWriter {
            log,
            settings,
            state: state_tx,
        };
        let handle = tokio::spawn(writer.run(queue, close_rx));
        Self { close, state, handle }
    }

    pub fn state(&self) -> WriterState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<WriterState> {
        self.state.clone()
    }

    /// Signals close, then waits for the backlog to drain.
    pub async fn close(self) -> Result<u64, WriterError> {
        self.close.send_replace(true);
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(WriterError::Task(e.to_string())),
        }
    }
}

struct ResultsWriter {
    log: Arc<dyn ReadingsLog>,
    settings: WriterSettings,
    state: watch::Sender<WriterState>,
}

impl ResultsWriter {
    async fn run(
        self,
        mut queue: ReadingsConsumer,
        close: watch::Receiver<bool>,
    ) -> Result<u64, WriterError> {
        info!(queue = queue.name(), "results writer started");
        let mut written = 0u64;

        loop {
            let closing = *close.borrow();
            if closing && queue.is_empty() {
                break;
            }
            if closing {
                self.state.send_replace(WriterState::Draining { written });
            }

            match queue.pop_timeout(self.settings.poll_timeout).await {
                Pop::Reading(reading) => {
                    if let Err(e) = self.append_with_retry(&reading).await {
                        error!(error = %e, written, "results writer failed");
                        self.state.send_replace(WriterState::Failed {
                            written,
                            reason: e.to_string(),
                        });
                        return Err(e);
                    }
                    written += 1;
                    if !closing {
                        self.state.send_replace(WriterState::Running { written });
                    }
                }
                Pop::TimedOut => {}
                Pop::Disconnected => {
                    debug!("every publisher is gone, nothing left to write");
                    break;
                }
            }
        }

        info!(written, "results writer finished");
        self.state.send_replace(WriterState::Finished { written });
        Ok(written)
    }

    async fn append_with_retry(&self, reading: &Reading) -> Result<(), WriterError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.log.append(reading).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => return Err(WriterError::Log(e)),
                Err(e) if attempts > self.settings.max_retries => {
                    return Err(WriterError::RetriesExhausted { attempts, source: e });
                }
                Err(e) => {
                    warn!(attempts, error = %e, "failed to append reading, retrying");
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
        }
    }
}

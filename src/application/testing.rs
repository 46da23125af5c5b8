// Test doubles shared by the application layer tests
use super::measurement::{MeasurementError, MeasurementFactory, MeasurementMethod, StopSignal};
use super::readings_log::{LogError, ReadingGroups, ReadingsLog, group_readings};
use crate::domain::reading::{Browser, Measurement, Reading, RecordingMethod};
use crate::domain::window::TimeWindow;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Step {
    Return(Measurement),
    Error,
    Panic,
}

/// Plays back a script of outcomes, then repeats a steady measurement.
pub struct ScriptedMethod {
    method: RecordingMethod,
    script: VecDeque<Step>,
    steady: Measurement,
    delay: Duration,
    fail_prepare: bool,
    panic_prepare: bool,
    panic_cleanup: bool,
    cleaned: Arc<AtomicBool>,
}

impl ScriptedMethod {
    pub fn steady(download: f64, upload: f64) -> Self {
        Self {
            method: RecordingMethod::SpeedtestCli,
            script: VecDeque::new(),
            steady: Measurement::from_speeds(download, upload),
            delay: Duration::from_millis(1),
            fail_prepare: false,
            panic_prepare: false,
            panic_cleanup: false,
            cleaned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn for_method(mut self, method: RecordingMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_script(mut self, steps: Vec<Step>) -> Self {
        self.script = steps.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn panicking_prepare(mut self) -> Self {
        self.panic_prepare = true;
        self
    }

    pub fn panicking_cleanup(mut self) -> Self {
        self.panic_cleanup = true;
        self
    }

    pub fn cleaned(&self) -> Arc<AtomicBool> {
        self.cleaned.clone()
    }
}

#[async_trait]
impl MeasurementMethod for ScriptedMethod {
    fn method(&self) -> RecordingMethod {
        self.method
    }

    async fn prepare(&mut self) -> Result<(), MeasurementError> {
        if self.panic_prepare {
            panic!("driver exploded");
        }
        if self.fail_prepare {
            return Err(MeasurementError::Resource("no browser driver".to_string()));
        }
        Ok(())
    }

    async fn take_measurement(&mut self, _stop: &StopSignal) -> Result<Measurement, MeasurementError> {
        tokio::time::sleep(self.delay).await;
        match self.script.pop_front() {
            Some(Step::Return(measurement)) => Ok(measurement),
            Some(Step::Error) => Err(MeasurementError::Unexpected("scripted failure".to_string())),
            Some(Step::Panic) => panic!("scripted panic"),
            None => Ok(self.steady.clone()),
        }
    }

    async fn cleanup(&mut self) {
        self.cleaned.store(true, Ordering::SeqCst);
        if self.panic_cleanup {
            panic!("driver hung up");
        }
    }
}

/// Hands out steady scripted methods, slow enough that recorders stay busy.
#[derive(Default)]
pub struct ScriptedFactory {
    pub fail_create: bool,
}

impl MeasurementFactory for ScriptedFactory {
    fn create(
        &self,
        method: RecordingMethod,
        _browser: Option<Browser>,
    ) -> Result<Box<dyn MeasurementMethod>, MeasurementError> {
        if self.fail_create {
            return Err(MeasurementError::Resource("driver unavailable".to_string()));
        }
        Ok(Box::new(
            ScriptedMethod::steady(40.0, 8.0)
                .for_method(method)
                .with_delay(Duration::from_millis(20)),
        ))
    }
}

/// In-memory results log that can be told to fail the next few appends.
#[derive(Default)]
pub struct MemoryLog {
    rows: Mutex<Vec<Reading>>,
    failures_left: AtomicU32,
    permission_denied: AtomicBool,
}

impl MemoryLog {
    pub fn failing(times: u32) -> Self {
        let log = Self::default();
        log.failures_left.store(times, Ordering::SeqCst);
        log
    }

    pub fn denied() -> Self {
        let log = Self::default();
        log.permission_denied.store(true, Ordering::SeqCst);
        log
    }

    pub fn with_rows(rows: Vec<Reading>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<Reading> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReadingsLog for MemoryLog {
    async fn append(&self, reading: &Reading) -> Result<(), LogError> {
        let path = std::path::Path::new("memory.csv");
        if self.permission_denied.load(Ordering::SeqCst) {
            return Err(LogError::from_io(path, io::Error::from(io::ErrorKind::PermissionDenied)));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LogError::from_io(path, io::Error::other("disk full")));
        }
        self.rows.lock().unwrap().push(reading.clone());
        Ok(())
    }

    async fn read(&self, window: &TimeWindow, merge: bool) -> Result<ReadingGroups, LogError> {
        Ok(group_readings(self.rows(), window, merge))
    }
}

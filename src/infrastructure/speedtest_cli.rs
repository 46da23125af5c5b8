// Speedtest CLI measurement - shells out to speedtest-cli in two phases
use crate::application::measurement::{MeasurementError, MeasurementMethod, StopSignal};
use crate::domain::reading::{Measurement, RecordingMethod, bits_to_megabits};
use crate::infrastructure::config::SpeedtestSettings;
use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// The part of `speedtest-cli --json` output we use. Speeds are bits/s.
#[derive(Debug, Deserialize)]
struct SpeedtestReport {
    #[serde(default)]
    download: f64,
    #[serde(default)]
    upload: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Download,
    Upload,
}

impl Phase {
    fn flag(self) -> &'static str {
        match self {
            Phase::Download => "--no-upload",
            Phase::Upload => "--no-download",
        }
    }
}

pub struct SpeedtestCli {
    settings: SpeedtestSettings,
}

impl SpeedtestCli {
    pub fn new(settings: SpeedtestSettings) -> Self {
        Self { settings }
    }

    /// Runs one phase and returns its speed in megabits per second.
    async fn run_phase(&self, phase: Phase) -> Result<f64, String> {
        let output = Command::new(&self.settings.program)
            .args(&self.settings.args)
            .args(["--json", phase.flag()])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let timeout = Duration::from_secs(self.settings.timeout_secs);
        let output = tokio::time::timeout(timeout, output)
            .await
            .map_err(|_| format!("{phase:?} phase timed out after {}s", timeout.as_secs()))?
            .map_err(|e| format!("could not run {}: {e}", self.settings.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{phase:?} phase exited with {}: {}", output.status, stderr.trim()));
        }

        let report = parse_report(&output.stdout)?;
        Ok(bits_to_megabits(match phase {
            Phase::Download => report.download,
            Phase::Upload => report.upload,
        }))
    }
}

fn parse_report(stdout: &[u8]) -> Result<SpeedtestReport, String> {
    serde_json::from_slice(stdout).map_err(|e| format!("unreadable speedtest output: {e}"))
}

#[async_trait]
impl MeasurementMethod for SpeedtestCli {
    fn method(&self) -> RecordingMethod {
        RecordingMethod::SpeedtestCli
    }

    /// Fails fast if the program is not installed.
    async fn prepare(&mut self) -> Result<(), MeasurementError> {
        let version = Command::new(&self.settings.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        match version {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(MeasurementError::Resource(format!(
                "{} is not installed or not on PATH",
                self.settings.program
            ))),
            Err(e) => Err(MeasurementError::Resource(format!(
                "could not run {}: {e}",
                self.settings.program
            ))),
        }
    }

    async fn take_measurement(&mut self, stop: &StopSignal) -> Result<Measurement, MeasurementError> {
        let download = match self.run_phase(Phase::Download).await {
            Ok(speed) => speed,
            Err(reason) => return Ok(Measurement::failure(reason)),
        };
        if stop.is_set() {
            return Ok(Measurement::Interrupted);
        }
        let upload = match self.run_phase(Phase::Upload).await {
            Ok(speed) => speed,
            Err(reason) => return Ok(Measurement::failure(reason)),
        };
        Ok(Measurement::from_speeds(download, upload))
    }
}

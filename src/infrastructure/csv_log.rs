// CSV results log - ReadingsLog backed by a file on disk
use crate::application::readings_log::{LogError, ReadingGroups, ReadingsLog, group_readings};
use crate::domain::reading::{Reading, RecordingMethod};
use crate::domain::window::TimeWindow;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HEADER: [&str; 4] = ["download", "upload", "timestamp", "method"];

#[derive(Debug, Deserialize)]
struct LogRow {
    download: f64,
    upload: f64,
    timestamp: String,
    method: String,
}

#[derive(Debug, Clone)]
pub struct CsvReadingsLog {
    path: PathBuf,
    time_format: String,
}

impl CsvReadingsLog {
    pub fn new(path: impl Into<PathBuf>, time_format: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            time_format: time_format.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_blocking(&self, reading: &Reading) -> Result<(), LogError> {
        // The file is created at startup. If it has vanished since, report it
        // rather than quietly starting a new one.
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| LogError::from_io(&self.path, e))?;
        let empty = file
            .metadata()
            .map_err(|e| LogError::from_io(&self.path, e))?
            .len()
            == 0;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if empty {
            writer
                .write_record(HEADER)
                .map_err(|e| LogError::from_csv(&self.path, e))?;
        }
        writer
            .write_record([
                reading.download().to_string(),
                reading.upload().to_string(),
                reading.timestamp().format(&self.time_format).to_string(),
                reading.method().label().to_string(),
            ])
            .map_err(|e| LogError::from_csv(&self.path, e))?;
        writer.flush().map_err(|e| LogError::from_io(&self.path, e))
    }

    fn read_blocking(&self) -> Result<Vec<Reading>, LogError> {
        let mut reader = match csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(&self.path)
        {
            Ok(reader) => reader,
            Err(e) => match LogError::from_csv(&self.path, e) {
                LogError::OutputMissing { .. } => {
                    debug!(path = %self.path.display(), "results log does not exist yet");
                    return Ok(Vec::new());
                }
                other => return Err(other),
            },
        };

        let mut readings = Vec::new();
        for (line, row) in reader.deserialize::<LogRow>().enumerate() {
            let parsed = row
                .map_err(|e| e.to_string())
                .and_then(|row| self.parse_row(row));
            match parsed {
                Ok(reading) => readings.push(reading),
                // A crash mid-append can leave a partial last row.
                Err(reason) => warn!(row = line + 1, %reason, "skipping malformed results row"),
            }
        }
        Ok(readings)
    }

    fn parse_row(&self, row: LogRow) -> Result<Reading, String> {
        let timestamp = NaiveDateTime::parse_from_str(&row.timestamp, &self.time_format)
            .map_err(|e| format!("bad timestamp '{}': {e}", row.timestamp))?;
        let method: RecordingMethod = row.method.parse().map_err(|e| format!("{e}"))?;
        Reading::new(row.download, row.upload, timestamp, method).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ReadingsLog for CsvReadingsLog {
    async fn append(&self, reading: &Reading) -> Result<(), LogError> {
        let log = self.clone();
        let reading = reading.clone();
        tokio::task::spawn_blocking(move || log.append_blocking(&reading))
            .await
            .map_err(|e| LogError::Io {
                path: self.path.display().to_string(),
                source: io::Error::other(e.to_string()),
            })?
    }

    async fn read(&self, window: &TimeWindow, merge: bool) -> Result<ReadingGroups, LogError> {
        let log = self.clone();
        let readings = tokio::task::spawn_blocking(move || log.read_blocking())
            .await
            .map_err(|e| LogError::Io {
                path: self.path.display().to_string(),
                source: io::Error::other(e.to_string()),
            })??;
        Ok(group_readings(readings, window, merge))
    }
}

/// Creates the results file, and any missing parent directories. Returns
/// whether the file already existed.
pub fn ensure_file_exists(path: &Path) -> Result<bool, LogError> {
    if path.exists() {
        return Ok(true);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| LogError::from_io(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LogError::from_io(path, e))?;
    Ok(false)
}

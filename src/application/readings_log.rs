// Repository trait for the persisted results log
use crate::domain::reading::{Reading, RecordingMethod};
use crate::domain::window::TimeWindow;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("No output file: {path} was not found, please restart the application")]
    OutputMissing { path: String },
    #[error(
        "Permission denied: please ensure you have full access to {path}, or run the application with sufficient privileges"
    )]
    PermissionDenied { path: String },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("CSV error on {path}: {message}")]
    Csv { path: String, message: String },
}

impl LogError {
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.display().to_string();
        match source.kind() {
            io::ErrorKind::NotFound => LogError::OutputMissing { path },
            io::ErrorKind::PermissionDenied => LogError::PermissionDenied { path },
            _ => LogError::Io { path, source },
        }
    }

    pub fn from_csv(path: &Path, error: csv::Error) -> Self {
        match error.into_kind() {
            csv::ErrorKind::Io(source) => Self::from_io(path, source),
            other => LogError::Csv {
                path: path.display().to_string(),
                message: format!("{other:?}"),
            },
        }
    }

    /// Missing files and permission problems will not fix themselves.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LogError::Io { .. } | LogError::Csv { .. })
    }
}

/// Readings either merged into one chronological list, or grouped by method.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingGroups {
    Merged(Vec<Reading>),
    ByMethod(BTreeMap<RecordingMethod, Vec<Reading>>),
}

impl ReadingGroups {
    pub fn len(&self) -> usize {
        match self {
            ReadingGroups::Merged(readings) => readings.len(),
            ReadingGroups::ByMethod(groups) => groups.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_readings(self) -> Vec<Reading> {
        match self {
            ReadingGroups::Merged(readings) => readings,
            ReadingGroups::ByMethod(groups) => groups.into_values().flatten().collect(),
        }
    }
}

/// Filters readings through the window, then sorts them by timestamp either
/// as one list or per method. Methods with no readings get no group.
pub fn group_readings(
    readings: impl IntoIterator<Item = Reading>,
    window: &TimeWindow,
    merge: bool,
) -> ReadingGroups {
    let admitted = readings.into_iter().filter(|r| window.admits(r));

    if merge {
        let mut merged: Vec<Reading> = admitted.collect();
        merged.sort_by_key(Reading::timestamp);
        return ReadingGroups::Merged(merged);
    }

    let mut groups: BTreeMap<RecordingMethod, Vec<Reading>> = BTreeMap::new();
    for reading in admitted {
        groups.entry(reading.method()).or_default().push(reading);
    }
    for group in groups.values_mut() {
        group.sort_by_key(Reading::timestamp);
    }
    ReadingGroups::ByMethod(groups)
}

#[async_trait]
pub trait ReadingsLog: Send + Sync {
    /// Appends one row and flushes it.
    async fn append(&self, reading: &Reading) -> Result<(), LogError>;

    /// Reads every row in the window. A log that does not exist yet, or holds
    /// only a header, reads as empty.
    async fn read(&self, window: &TimeWindow, merge: bool) -> Result<ReadingGroups, LogError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 10)
            .unwrap()
            .and_hms_opt(18, 30, second)
            .unwrap()
    }

    fn reading(second: u32, method: RecordingMethod) -> Reading {
        Reading::new(30.0, 5.0, at(second), method).unwrap()
    }

    #[test]
    fn test_merged_readings_are_sorted() {
        let readings = vec![
            reading(30, RecordingMethod::SpeedtestCli),
            reading(10, RecordingMethod::BtWebsite),
            reading(20, RecordingMethod::SpeedtestCli),
        ];
        let ReadingGroups::Merged(merged) = group_readings(readings, &TimeWindow::unbounded(), true) else {
            panic!("expected merged readings");
        };
        let seconds: Vec<_> = merged.iter().map(|r| r.timestamp()).collect();
        assert_eq!(seconds, vec![at(10), at(20), at(30)]);
    }

    #[test]
    fn test_window_applies_before_grouping() {
        let readings = vec![
            reading(10, RecordingMethod::SpeedtestCli),
            reading(20, RecordingMethod::SpeedtestCli),
            reading(30, RecordingMethod::SpeedtestCli),
        ];
        let window = TimeWindow::new(Some(at(15)), Some(at(25))).unwrap();
        let groups = group_readings(readings, &window, true);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.into_readings()[0].timestamp(), at(20));
    }

    #[test]
    fn test_empty_method_groups_are_pruned() {
        let readings = vec![
            reading(12, RecordingMethod::BtWebsite),
            reading(11, RecordingMethod::SpeedtestCli),
            reading(10, RecordingMethod::BtWebsite),
        ];
        let ReadingGroups::ByMethod(groups) = group_readings(readings, &TimeWindow::unbounded(), false) else {
            panic!("expected grouped readings");
        };
        assert_eq!(groups.len(), 2);
        assert!(!groups.contains_key(&RecordingMethod::WhichWebsite));
        let bt: Vec<_> = groups[&RecordingMethod::BtWebsite].iter().map(|r| r.timestamp()).collect();
        assert_eq!(bt, vec![at(10), at(12)]);
    }

    #[test]
    fn test_io_errors_are_classified() {
        let path = Path::new("results.csv");
        assert!(matches!(
            LogError::from_io(path, io::Error::from(io::ErrorKind::NotFound)),
            LogError::OutputMissing { .. }
        ));
        let denied = LogError::from_io(path, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(denied.to_string().starts_with("Permission denied"));
        assert!(!denied.is_retryable());
        assert!(LogError::from_io(path, io::Error::other("disk full")).is_retryable());
    }
}

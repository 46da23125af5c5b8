// Chart domain models
use super::reading::RecordingMethod;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesData {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
    pub points: Vec<TimeSeriesPoint>,
}

impl SeriesData {
    pub fn new(id: String, name: String, color: Option<String>, points: Vec<TimeSeriesPoint>) -> Self {
        Self {
            id,
            name,
            color,
            points,
        }
    }
}

/// How readings from different methods are laid out on the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// One download line and one upload line across every method.
    Merged,
    /// A download/upload pair per method.
    PerMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub title: String,
    pub unit: String,
    pub mode: ViewMode,
    /// Bumped every time new points are merged in.
    pub revision: u64,
    pub series: Vec<SeriesData>,
}

impl ChartData {
    pub fn new(mode: ViewMode, revision: u64, series: Vec<SeriesData>) -> Self {
        let title = match mode {
            ViewMode::Merged => "Merged Graph",
            ViewMode::PerMethod => "Unmerged Graph",
        };
        Self {
            title: title.to_string(),
            unit: "Megabits/s".to_string(),
            mode,
            revision,
            series,
        }
    }
}

/// Line colours (download, upload) for each method's series.
pub fn line_colors(method: Option<RecordingMethod>) -> (&'static str, &'static str) {
    match method {
        None => ("#000000", "#ff0000"),
        Some(RecordingMethod::SpeedtestCli) => ("#1f77b4", "#aec7e8"),
        Some(RecordingMethod::BtWebsite) => ("#6a0dad", "#c39bd3"),
        Some(RecordingMethod::WhichWebsite) => ("#d62728", "#ff9896"),
    }
}

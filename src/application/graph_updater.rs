// Graph updater - merges readings into chart series on a timer
use super::readings_queue::ReadingsConsumer;
use crate::domain::chart::{ChartData, SeriesData, TimeSeriesPoint, ViewMode, line_colors};
use crate::domain::reading::{Reading, RecordingMethod};
use crate::domain::window::TimeWindow;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Readings behind one download/upload line pair, kept in timestamp order.
#[derive(Debug, Default)]
struct Track {
    readings: Vec<Reading>,
}

impl Track {
    /// Inserts in timestamp order. Returns false for a reading already present,
    /// which happens when a reading reaches both the log and the live queue.
    fn insert(&mut self, reading: Reading) -> bool {
        let ts = reading.timestamp();
        let start = self.readings.partition_point(|r| r.timestamp() < ts);
        let end = self.readings.partition_point(|r| r.timestamp() <= ts);
        if self.readings[start..end].contains(&reading) {
            return false;
        }
        self.readings.insert(end, reading);
        true
    }

    fn series(&self, method: Option<RecordingMethod>) -> [SeriesData; 2] {
        let (down_color, up_color) = line_colors(method);
        let (id, name) = match method {
            Some(m) => (format!("{m:?}").to_lowercase(), format!("{m} ")),
            None => ("all".to_string(), String::new()),
        };
        let points = |speed: fn(&Reading) -> f64| -> Vec<TimeSeriesPoint> {
            self.readings
                .iter()
                .map(|r| TimeSeriesPoint::new(r.timestamp().and_utc().timestamp_millis(), speed(r)))
                .collect()
        };
        [
            SeriesData::new(
                format!("{id}-download"),
                format!("{name}Download").trim().to_string(),
                Some(down_color.to_string()),
                points(Reading::download),
            ),
            SeriesData::new(
                format!("{id}-upload"),
                format!("{name}Upload").trim().to_string(),
                Some(up_color.to_string()),
                points(Reading::upload),
            ),
        ]
    }
}

#[derive(Debug)]
enum Tracks {
    Merged(Track),
    /// Tracks appear the first time a method produces a reading.
    PerMethod(BTreeMap<RecordingMethod, Track>),
}

#[derive(Debug)]
pub struct GraphUpdater {
    tracks: Tracks,
    window: TimeWindow,
    revision: u64,
}

impl GraphUpdater {
    pub fn new(mode: ViewMode, window: TimeWindow) -> Self {
        let tracks = match mode {
            ViewMode::Merged => Tracks::Merged(Track::default()),
            ViewMode::PerMethod => Tracks::PerMethod(BTreeMap::new()),
        };
        Self {
            tracks,
            window,
            revision: 0,
        }
    }

    /// Seeds the chart with historical readings, through the same filter as
    /// live updates.
    pub fn with_history(mode: ViewMode, window: TimeWindow, history: Vec<Reading>) -> Self {
        let mut updater = Self::new(mode, window);
        updater.merge_all(history);
        updater
    }

    pub fn mode(&self) -> ViewMode {
        match self.tracks {
            Tracks::Merged(_) => ViewMode::Merged,
            Tracks::PerMethod(_) => ViewMode::PerMethod,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Merges readings that pass the window. Returns how many were added; the
    /// revision only moves when that is non-zero.
    pub fn merge_all(&mut self, readings: impl IntoIterator<Item = Reading>) -> usize {
        let mut added = 0;
        for reading in readings {
            if !self.window.admits(&reading) {
                continue;
            }
            let track = match &mut self.tracks {
                Tracks::Merged(track) => track,
                Tracks::PerMethod(tracks) => tracks.entry(reading.method()).or_default(),
            };
            if track.insert(reading) {
                added += 1;
            }
        }
        if added > 0 {
            self.revision += 1;
        }
        added
    }

    /// Drains whatever is already buffered in the live queue. Never waits.
    pub fn drain(&mut self, queue: &mut ReadingsConsumer) -> usize {
        let pending = queue.drain();
        self.merge_all(pending)
    }

    pub fn chart(&self) -> ChartData {
        let series = match &self.tracks {
            Tracks::Merged(track) => track.series(None).into_iter().collect(),
            Tracks::PerMethod(tracks) => tracks
                .iter()
                .flat_map(|(method, track)| track.series(Some(*method)))
                .collect(),
        };
        ChartData::new(self.mode(), self.revision, series)
    }
}

/// Drives a `GraphUpdater` from a live queue until closed.
pub struct GraphSession {
    snapshots: watch::Receiver<ChartData>,
    close: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl GraphSession {
    pub fn open(mut updater: GraphUpdater, mut queue: ReadingsConsumer, refresh: Duration) -> Self {
        let (snapshot_tx, snapshots) = watch::channel(updater.chart());
        let (close, mut close_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let added = updater.drain(&mut queue);
                        if added > 0 {
                            tracing::debug!(added, revision = updater.revision(), "redrawing graph");
                            snapshot_tx.send_replace(updater.chart());
                        }
                    }
                    _ = close_rx.changed() => break,
                }
            }
            tracing::debug!("graph session closed");
        });

        Self {
            snapshots,
            close,
            handle,
        }
    }

    pub fn snapshot(&self) -> ChartData {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChartData> {
        self.snapshots.clone()
    }

    /// Stops the timer and drops the live queue.
    pub async fn close(self) {
        self.close.send_replace(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "graph session task failed");
        }
    }
}

// Graph service - opens and closes the single live graph session
use super::graph_updater::{GraphSession, GraphUpdater};
use super::readings_log::{LogError, ReadingsLog};
use super::readings_queue::{LiveTap, OverflowPolicy, readings_queue};
use crate::domain::chart::{ChartData, ViewMode};
use crate::domain::window::TimeWindow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphSettings {
    pub refresh: Duration,
    pub live_capacity: usize,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            refresh: Duration::from_secs(10),
            live_capacity: 256,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("a graph is already open, close it first")]
    AlreadyOpen,
    #[error("no graph is open")]
    NotOpen,
    #[error(transparent)]
    Log(#[from] LogError),
}

pub struct GraphService {
    log: Arc<dyn ReadingsLog>,
    live: LiveTap,
    settings: GraphSettings,
    session: Mutex<Option<GraphSession>>,
}

impl GraphService {
    pub fn new(log: Arc<dyn ReadingsLog>, live: LiveTap, settings: GraphSettings) -> Self {
        Self {
            log,
            live,
            settings,
            session: Mutex::new(None),
        }
    }

    /// Loads history from the log, then keeps the chart current from the live
    /// queue until closed.
    pub async fn open(&self, mode: ViewMode, window: TimeWindow) -> Result<ChartData, GraphError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(GraphError::AlreadyOpen);
        }

        // Attach before loading so a reading published during the load is
        // caught live even if the read also sees it; the updater skips
        // readings it already has. Readings still sitting in the results
        // queue from before the attach show up from the next open onwards.
        let (publisher, queue) = readings_queue("live", self.settings.live_capacity, OverflowPolicy::DropNewest);
        self.live.attach(publisher).map_err(|_| GraphError::AlreadyOpen)?;

        let history = match self.log.read(&window, mode == ViewMode::Merged).await {
            Ok(history) => history,
            Err(e) => {
                self.live.detach();
                return Err(e.into());
            }
        };
        tracing::info!(?mode, readings = history.len(), "opening graph");

        let updater = GraphUpdater::with_history(mode, window, history.into_readings());
        let opened = GraphSession::open(updater, queue, self.settings.refresh);
        let chart = opened.snapshot();
        *session = Some(opened);
        Ok(chart)
    }

    pub async fn snapshot(&self) -> Result<ChartData, GraphError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(GraphSession::snapshot)
            .ok_or(GraphError::NotOpen)
    }

    pub async fn subscribe(&self) -> Result<watch::Receiver<ChartData>, GraphError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(GraphSession::subscribe)
            .ok_or(GraphError::NotOpen)
    }

    pub async fn is_open(&self) -> bool {
        self.session.lock().await.is_some()
    }

    pub fn live_dropped(&self) -> u64 {
        self.live.dropped()
    }

    /// Detaches the live queue so recorders stop feeding it, then stops the timer.
    pub async fn close(&self) -> Result<(), GraphError> {
        let session = self.session.lock().await.take().ok_or(GraphError::NotOpen)?;
        self.live.detach();
        session.close().await;
        tracing::info!("graph closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::readings_queue::ReadingsSink;
    use crate::application::testing::MemoryLog;
    use crate::domain::reading::{Reading, RecordingMethod};

    fn service(log: MemoryLog) -> (GraphService, LiveTap) {
        let live = LiveTap::default();
        let settings = GraphSettings {
            refresh: Duration::from_millis(20),
            live_capacity: 16,
        };
        (GraphService::new(Arc::new(log), live.clone(), settings), live)
    }

    #[tokio::test]
    async fn test_open_loads_history_and_attaches_tap() {
        let history = vec![Reading::now(70.0, 18.0, RecordingMethod::SpeedtestCli).unwrap()];
        let (graphs, live) = service(MemoryLog::with_rows(history));

        let chart = graphs.open(ViewMode::Merged, TimeWindow::unbounded()).await.unwrap();
        assert_eq!(chart.series[0].points.len(), 1);
        assert!(live.is_attached());
        assert!(matches!(
            graphs.open(ViewMode::PerMethod, TimeWindow::unbounded()).await,
            Err(GraphError::AlreadyOpen)
        ));

        graphs.close().await.unwrap();
        assert!(!live.is_attached());
        assert!(matches!(graphs.snapshot().await, Err(GraphError::NotOpen)));
    }

    #[tokio::test]
    async fn test_reading_in_history_and_live_is_drawn_once() {
        let reading = Reading::now(55.0, 11.0, RecordingMethod::BtWebsite).unwrap();
        let (graphs, live) = service(MemoryLog::with_rows(vec![reading.clone()]));
        let (results, _results_rx) = readings_queue("results", 16, OverflowPolicy::Block);
        let sink = ReadingsSink::new(results, live);

        graphs.open(ViewMode::Merged, TimeWindow::unbounded()).await.unwrap();
        let mut snapshots = graphs.subscribe().await.unwrap();
        sink.publish(reading).await.unwrap();
        sink.publish(Reading::now(60.0, 12.0, RecordingMethod::BtWebsite).unwrap())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), snapshots.changed())
            .await
            .unwrap()
            .unwrap();
        let chart = graphs.snapshot().await.unwrap();
        let downloads: Vec<f64> = chart.series[0].points.iter().map(|p| p.value).collect();
        assert_eq!(downloads.len(), 2);
        assert!(downloads.contains(&55.0) && downloads.contains(&60.0));
        graphs.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_live_readings_reach_open_graph() {
        let (graphs, live) = service(MemoryLog::default());
        let (results, _results_rx) = readings_queue("results", 16, OverflowPolicy::Block);
        let sink = ReadingsSink::new(results, live);

        let mut snapshots = {
            graphs.open(ViewMode::PerMethod, TimeWindow::unbounded()).await.unwrap();
            graphs.subscribe().await.unwrap()
        };
        sink.publish(Reading::now(12.0, 3.0, RecordingMethod::WhichWebsite).unwrap())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), snapshots.changed())
            .await
            .unwrap()
            .unwrap();
        let chart = graphs.snapshot().await.unwrap();
        assert_eq!(chart.series.len(), 2);
        assert_eq!(chart.series[0].name, "Which? Website Download");

        graphs.close().await.unwrap();
        sink.publish(Reading::now(12.0, 3.0, RecordingMethod::WhichWebsite).unwrap())
            .await
            .unwrap();
    }
}

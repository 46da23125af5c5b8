// Application state for HTTP handlers
use crate::application::graph_service::GraphService;
use crate::application::readings_log::ReadingsLog;
use crate::application::recorder_registry::RecorderRegistry;
use crate::application::results_writer::WriterState;
use std::sync::Arc;
use tokio::sync::watch;

pub struct AppState {
    pub registry: RecorderRegistry,
    pub graphs: GraphService,
    pub log: Arc<dyn ReadingsLog>,
    pub writer: watch::Receiver<WriterState>,
    /// Format accepted for `from`/`to` query values, besides ISO 8601.
    pub time_format: String,
}

// HTTP request handlers
use crate::application::readings_log::ReadingGroups;
use crate::application::recorder::RecorderStatus;
use crate::application::recorder_registry::RecorderSummary;
use crate::application::results_writer::WriterState;
use crate::domain::chart::{ChartData, ViewMode};
use crate::domain::reading::{Browser, RecordingMethod};
use crate::domain::window::TimeWindow;
use crate::presentation::api_error::ApiError;
use crate::presentation::app_state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::NaiveDateTime;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct StartRecorderRequest {
    pub id: String,
    pub method: String,
    pub browser: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Include stopped recorders, with the reason they stopped.
    pub all: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub merge: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenGraphRequest {
    pub merge: Option<bool>,
    pub mode: Option<ViewMode>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecorderView {
    pub id: String,
    pub method: RecordingMethod,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<RecorderSummary> for RecorderView {
    fn from(summary: RecorderSummary) -> Self {
        let reason = match &summary.status {
            RecorderStatus::Stopped { reason } => reason.as_ref().map(ToString::to_string),
            _ => None,
        };
        Self {
            id: summary.identifier,
            method: summary.method,
            status: summary.status.label(),
            reason,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub writer: &'static str,
    pub written: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer_error: Option<String>,
    pub running_recorders: usize,
    pub slots_in_use: usize,
    pub max_recorders: usize,
    pub graph_open: bool,
    pub live_dropped: u64,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn start_recorder(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRecorderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let method: RecordingMethod = request
        .method
        .parse()
        .map_err(|e| ApiError::bad_request(format!("{e}")))?;
    let browser = request
        .browser
        .as_deref()
        .map(str::parse::<Browser>)
        .transpose()
        .map_err(|e| ApiError::bad_request(format!("{e}")))?;

    let summary = state.registry.start(&request.id, method, browser)?;
    tracing::info!(recorder = %summary.identifier, %method, "recorder started");
    Ok((StatusCode::CREATED, Json(RecorderView::from(summary))))
}

pub async fn stop_recorder(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state.registry.stop(&id)?;
    Ok((StatusCode::ACCEPTED, Json(RecorderView::from(summary))))
}

/// Lists recorders that are running or finishing their last measurement.
pub async fn list_recorders(
    Query(query): Query<ListQuery>,
    State(state): State<Arc<AppState>>,
) -> Json<Vec<RecorderView>> {
    let recorders = if query.all.unwrap_or(false) {
        state.registry.list_all()
    } else {
        state.registry.list_running()
    };
    Json(recorders.into_iter().map(RecorderView::from).collect())
}

pub async fn read_results(
    Query(query): Query<WindowQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadingGroups>, ApiError> {
    let window = parse_window(query.from.as_deref(), query.to.as_deref(), &state.time_format)?;
    let readings = state.log.read(&window, query.merge.unwrap_or(true)).await?;
    Ok(Json(readings))
}

pub async fn open_graph(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OpenGraphRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mode = match (request.mode, request.merge) {
        (Some(mode), _) => mode,
        (None, Some(false)) => ViewMode::PerMethod,
        (None, _) => ViewMode::Merged,
    };
    let window = parse_window(request.from.as_deref(), request.to.as_deref(), &state.time_format)?;
    let chart = state.graphs.open(mode, window).await?;
    Ok((StatusCode::CREATED, Json(chart)))
}

pub async fn get_graph(State(state): State<Arc<AppState>>) -> Result<Json<ChartData>, ApiError> {
    Ok(Json(state.graphs.snapshot().await?))
}

/// Streams a chart snapshot on connect and after every redraw, until the
/// graph is closed.
pub async fn graph_events(
    State(state): State<Arc<AppState>>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let mut snapshots = state.graphs.subscribe().await?;
    let stream = async_stream::stream! {
        let first = snapshots.borrow_and_update().clone();
        yield Event::default().event("chart").json_data(&first);
        while snapshots.changed().await.is_ok() {
            let chart = snapshots.borrow_and_update().clone();
            yield Event::default().event("chart").json_data(&chart);
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn close_graph(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.graphs.close().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusView> {
    let writer = state.writer.borrow().clone();
    let writer_error = match &writer {
        WriterState::Failed { reason, .. } => Some(reason.clone()),
        _ => None,
    };
    Json(StatusView {
        writer: writer.label(),
        written: writer.written(),
        writer_error,
        running_recorders: state.registry.list_running().len(),
        slots_in_use: state.registry.slots_in_use(),
        max_recorders: state.registry.capacity(),
        graph_open: state.graphs.is_open().await,
        live_dropped: state.graphs.live_dropped(),
    })
}

fn parse_window(from: Option<&str>, to: Option<&str>, format: &str) -> Result<TimeWindow, ApiError> {
    let from = from.map(|v| parse_time(v, format)).transpose()?;
    let to = to.map(|v| parse_time(v, format)).transpose()?;
    TimeWindow::new(from, to).map_err(|e| ApiError::bad_request(e.to_string()))
}

/// Accepts the log's own timestamp format or ISO 8601 without an offset.
fn parse_time(value: &str, format: &str) -> Result<NaiveDateTime, ApiError> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, format)
        .or_else(|_| value.parse::<NaiveDateTime>())
        .map_err(|_| ApiError::bad_request(format!("cannot parse '{value}' as a timestamp")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::recorder::RecorderError;
    use crate::domain::reading::DEFAULT_TIME_FORMAT;
    use chrono::NaiveDate;

    #[test]
    fn test_window_accepts_log_format_and_iso() {
        let window = parse_window(Some("2024-03-01 08:00:00"), Some("2024-03-01T09:30:00"), DEFAULT_TIME_FORMAT)
            .unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(window.from(), day.and_hms_opt(8, 0, 0));
        assert_eq!(window.to(), day.and_hms_opt(9, 30, 0));
    }

    #[test]
    fn test_bad_windows_are_rejected() {
        assert!(parse_window(Some("yesterday"), None, DEFAULT_TIME_FORMAT).is_err());
        assert!(parse_window(Some("2024-03-02 00:00:00"), Some("2024-03-01 00:00:00"), DEFAULT_TIME_FORMAT).is_err());
        assert!(parse_window(None, None, DEFAULT_TIME_FORMAT).is_ok());
    }

    #[test]
    fn test_stopped_recorders_report_their_reason() {
        let view = RecorderView::from(RecorderSummary {
            identifier: "loft".to_string(),
            method: RecordingMethod::BtWebsite,
            status: RecorderStatus::Stopped {
                reason: Some(RecorderError::Resource("chromedriver not running".to_string())),
            },
        });
        assert_eq!(view.status, "stopped");
        assert!(view.reason.unwrap().contains("chromedriver"));
    }
}

// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use anyhow::Context;
use axum::{
    Router,
    routing::{delete, get},
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::application::graph_service::{GraphError, GraphService};
use crate::application::readings_log::ReadingsLog;
use crate::application::readings_queue::{LiveTap, OverflowPolicy, ReadingsSink, readings_queue};
use crate::application::recorder_pool::RecorderPool;
use crate::application::recorder_registry::RecorderRegistry;
use crate::application::results_writer::WriterSession;
use crate::infrastructure::config::load_app_config;
use crate::infrastructure::csv_log::{CsvReadingsLog, ensure_file_exists};
use crate::infrastructure::method_factory::DefaultMeasurementFactory;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    close_graph, get_graph, graph_events, health_check, list_recorders, open_graph, read_results,
    start_recorder, status, stop_recorder,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "broadbandbug=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_app_config()?;

    // Results file (infrastructure layer)
    let results_path = Path::new(&config.storage.results_path);
    let existed = ensure_file_exists(results_path)
        .with_context(|| format!("cannot prepare results file {}", results_path.display()))?;
    if !existed {
        tracing::info!(path = %results_path.display(), "created results file");
    }
    let log: Arc<dyn ReadingsLog> = Arc::new(CsvReadingsLog::new(
        results_path,
        config.storage.time_format.clone(),
    ));

    // Readings pipeline and services (application layer)
    let (results, results_rx) = readings_queue("results", config.storage.queue_capacity, OverflowPolicy::Block);
    let writer = WriterSession::spawn(log.clone(), config.storage.writer_settings(), results_rx);
    let live = LiveTap::default();

    let registry = RecorderRegistry::new(
        RecorderPool::new(config.recording.max_recorders),
        Arc::new(DefaultMeasurementFactory::new(config.clone())),
        ReadingsSink::new(results, live.clone()),
        config.recording.cooldown(),
    );
    let graphs = GraphService::new(log.clone(), live, config.graph.settings());

    let state = Arc::new(AppState {
        registry,
        graphs,
        log,
        writer: writer.watch_state(),
        time_format: config.storage.time_format.clone(),
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/status", get(status))
        .route("/recorders", get(list_recorders).post(start_recorder))
        .route("/recorders/:id", delete(stop_recorder))
        .route("/readings", get(read_results))
        .route("/graph", get(get_graph).post(open_graph).delete(close_graph))
        .route("/graph/events", get(graph_events))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    tracing::info!(%addr, max_recorders = config.recording.max_recorders, "starting broadbandbug");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Recorders first, so everything they publish still reaches the writer.
    tracing::info!("shutting down, waiting for recorders to finish");
    for summary in state.registry.stop_all(config.recording.stop_timeout()).await {
        tracing::info!(recorder = %summary.identifier, status = summary.status.label(), "recorder finished");
    }
    match state.graphs.close().await {
        Ok(()) | Err(GraphError::NotOpen) => {}
        Err(e) => tracing::warn!(error = %e, "failed to close graph"),
    }
    let written = writer.close().await.context("results writer failed")?;
    tracing::info!(written, "all readings saved");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

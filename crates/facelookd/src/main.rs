use anyhow::{Context, Result};
use facelook_core::{LoadSource, Recognizer, ReferenceDatabase, ScrfdDetector};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;

const DETECTOR_NAME: &str = "scrfd det_10g";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facelookd starting");

    let config = config::Config::load()?;
    tracing::info!(
        database_dir = %config.database_dir.display(),
        model_dir = %config.model_dir.display(),
        bind = %config.bind,
        "configuration loaded"
    );

    std::fs::create_dir_all(&config.database_dir).with_context(|| {
        format!("failed to create database directory {}", config.database_dir.display())
    })?;

    let mut detector = ScrfdDetector::load(&config.scrfd_model_path())
        .context("failed to load face detector")?;

    let (database, source) = ReferenceDatabase::load_or_build(&config.database_dir, &mut detector)
        .context("failed to load reference database")?;
    match &source {
        LoadSource::Cache => {
            tracing::info!(entries = database.len(), "using cached reference database")
        }
        LoadSource::Built(report) => tracing::info!(
            entries = database.len(),
            skipped = report.skipped(),
            "built reference database"
        ),
    }
    if database.is_empty() {
        tracing::warn!("reference database is empty; every face will be reported as Unknown");
    }

    let status = Arc::new(http::StatusInfo::new(&database, DETECTOR_NAME));
    let engine = engine::spawn_engine(Recognizer::new(detector, database))?;
    let app = http::router(http::AppState { engine, status }, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!(addr = %config.bind, "facelookd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("facelookd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

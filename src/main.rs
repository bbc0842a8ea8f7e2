// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::sync::{broadcast, watch};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::clock::{Clock, SystemClock};
use crate::application::device_monitor::DeviceMonitor;
use crate::application::device_service::{DeviceRegistry, spawn_device};
use crate::application::publisher::StatusPublisher;
use crate::infrastructure::broadcast_publisher::BroadcastPublisher;
use crate::infrastructure::config::load_meter_config;
use crate::infrastructure::http_publisher::HttpPublisher;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    get_history, get_status, health_check, ingest_sample, list_devices, reset_baseline,
    stream_status,
};

const STATUS_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let meter_config = load_meter_config()?;
    std::fs::create_dir_all(&meter_config.data_dir).with_context(|| {
        format!("Failed to create data directory {}", meter_config.data_dir.display())
    })?;
    if meter_config.devices.is_empty() {
        tracing::warn!("No devices configured");
    }

    // Create publishers (infrastructure layer)
    let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
    let mut publishers: Vec<Arc<dyn StatusPublisher>> =
        vec![Arc::new(BroadcastPublisher::new(status_tx.clone()))];
    if let Some(url) = &meter_config.publish.url {
        let timeout = Duration::from_secs(meter_config.publish.timeout_secs);
        publishers.push(Arc::new(HttpPublisher::new(url, timeout)?));
        tracing::info!("Publishing status to {}", url);
    }

    // Start one task per device (application layer)
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let heartbeat = Duration::from_millis(meter_config.heartbeat_ms);
    let mut handles = Vec::new();
    let mut tasks = Vec::new();
    for device_config in &meter_config.devices {
        let monitor = DeviceMonitor::open(device_config, &meter_config.data_dir, clock.now_ms())
            .with_context(|| format!("Failed to open device {}", device_config.name))?;
        let (handle, task) = spawn_device(monitor, heartbeat, clock.clone(), publishers.clone());
        handles.push(handle);
        tasks.push(task);
    }
    let registry = DeviceRegistry::new(handles);

    // Create application state
    let (shutdown_tx, shutdown) = watch::channel(false);
    let state = Arc::new(AppState {
        registry: registry.clone(),
        status_tx,
        shutdown,
    });

    // Build router (presentation layer)
    // Note: history responses are compressed in the handler, so no CompressionLayer
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/api/devices", get(list_devices))
        .route("/api/history/:id", get(get_history))
        .route("/api/devices/:id/status", get(get_status))
        .route("/api/devices/:id/reset", post(reset_baseline))
        .route("/api/devices/:id/samples", post(ingest_sample))
        .route("/api/devices/:id/stream", get(stream_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = meter_config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", meter_config.server.bind))?;
    tracing::info!("Starting pump-meter service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    // Final checkpoints
    registry.shutdown_all().await;
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Device task failed: {}", e);
        }
    }

    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
    // Open status streams hold their connections until told to stop
    let _ = shutdown_tx.send(true);
}

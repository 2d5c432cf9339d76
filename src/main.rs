//! PPE Camserver - per-camera PPE compliance monitoring
//!
//! Main entry point for the Camserver application.

use ppe_camserver::{
    camera_worker::WorkerDeps,
    config_store::{CameraProvider, ConfigStore, StaticCameraProvider},
    detection::HttpDetectorFactory,
    event_sink::{DetectionLogService, EventLogService, EventSink, ImageStore},
    metrics::{MetricsSink, RecorderMetrics},
    realtime_hub::RealtimeHub,
    snapshot_service::SnapshotService,
    state::{AppConfig, AppState},
    worker_manager::{spawn_reconcile_loop, WorkerManager},
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Retention sweep period
const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ppe_camserver=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting PPE Camserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database = config.database_url.is_some(),
        detector_url = %config.detector_url,
        image_dir = %config.image_dir.display(),
        thumb_dir = %config.thumb_dir.display(),
        reconcile_interval_sec = config.reconcile_interval.as_secs(),
        "Configuration loaded"
    );

    let images = ImageStore::new(config.image_dir.clone(), config.thumb_dir.clone()).await?;
    let realtime = Arc::new(RealtimeHub::new());

    // Camera source and event sink: MySQL when configured, memory otherwise
    let mut detection_log: Option<Arc<DetectionLogService>> = None;
    let (provider, sink): (Arc<dyn CameraProvider>, Arc<dyn EventSink>) =
        match &config.database_url {
            Some(url) => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(10)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect(url)
                    .await?;
                tracing::info!("Database connected");

                let config_store = ConfigStore::new(pool.clone()).await?;
                let service = Arc::new(
                    DetectionLogService::new(pool, images.clone()).with_hub(realtime.clone()),
                );
                detection_log = Some(service.clone());

                let provider: Arc<dyn CameraProvider> = Arc::new(config_store);
                let sink: Arc<dyn EventSink> = service;
                (provider, sink)
            }
            None => {
                let provider = match &config.cameras_file {
                    Some(path) => StaticCameraProvider::from_json_file(path).await?,
                    None => {
                        tracing::warn!(
                            "No DATABASE_URL or CAMERAS_FILE set, starting without cameras"
                        );
                        StaticCameraProvider::default()
                    }
                };
                let event_log = EventLogService::new(config.event_log_capacity, images.clone())
                    .with_hub(realtime.clone());

                let provider: Arc<dyn CameraProvider> = Arc::new(provider);
                let sink: Arc<dyn EventSink> = Arc::new(event_log);
                (provider, sink)
            }
        };

    let metrics: Arc<dyn MetricsSink> = Arc::new(RecorderMetrics);
    let fetcher = Arc::new(SnapshotService::new(config.snapshot_timeout)?);
    let detector_factory = Arc::new(HttpDetectorFactory::new(config.detector_url.clone())?);

    let deps = WorkerDeps::new(fetcher, detector_factory, sink.clone(), metrics.clone())
        .with_iou_threshold(config.iou_threshold);
    let worker_manager = Arc::new(WorkerManager::new(deps, config.stop_grace));

    let state = AppState {
        config: config.clone(),
        provider,
        images,
        sink,
        metrics,
        realtime,
        worker_manager,
    };

    // Initial worker set
    let cameras = state.provider.list_cameras().await?;
    let started = state.worker_manager.start_all(&cameras).await;
    tracing::info!(
        cameras = cameras.len(),
        started = started.len(),
        "Camera workers launched"
    );

    let shutdown = CancellationToken::new();

    // Follow camera configuration changes
    let reconcile_task = spawn_reconcile_loop(
        state.worker_manager.clone(),
        state.provider.clone(),
        state.config.reconcile_interval,
        shutdown.clone(),
    );

    // Image / event retention (runs every hour)
    let retention_images = state.images.clone();
    let retention_days = state.config.retention_days;
    let retention_cancel = shutdown.clone();
    let retention_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(RETENTION_INTERVAL);
        loop {
            tokio::select! {
                _ = retention_cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = retention_images.cleanup_older_than(retention_days).await {
                tracing::error!(error = %e, "Failed to cleanup expired images");
            }
            if let Some(service) = &detection_log {
                match service.delete_older_than(retention_days).await {
                    Ok(0) => {}
                    Ok(rows) => tracing::info!(rows = rows, "Expired events deleted"),
                    Err(e) => tracing::error!(error = %e, "Failed to delete expired events"),
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    shutdown.cancel();
    let _ = reconcile_task.await;
    let _ = retention_task.await;
    state.worker_manager.stop_all().await;

    tracing::info!("PPE Camserver stopped");
    Ok(())
}

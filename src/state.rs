//! Application state
//!
//! Environment configuration and the shared components wired by `main`

use crate::config_store::CameraProvider;
use crate::event_sink::{EventSink, ImageStore};
use crate::metrics::MetricsSink;
use crate::realtime_hub::RealtimeHub;
use crate::worker_manager::WorkerManager;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// MySQL URL; without it cameras come from `cameras_file` and events
    /// are kept in memory
    pub database_url: Option<String>,
    /// JSON camera list used when no database is configured
    pub cameras_file: Option<PathBuf>,
    /// Full-size event images
    pub image_dir: PathBuf,
    /// Event thumbnails
    pub thumb_dir: PathBuf,
    /// Remote detection server base URL
    pub detector_url: String,
    pub reconcile_interval: Duration,
    /// Time a worker gets to acknowledge a stop
    pub stop_grace: Duration,
    pub snapshot_timeout: Duration,
    /// Subject/equipment IoU matching threshold
    pub iou_threshold: f32,
    pub retention_days: u32,
    /// In-memory event log capacity
    pub event_log_capacity: usize,
}

impl AppConfig {
    /// Build from an arbitrary key lookup (environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
            match lookup(key) {
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    tracing::warn!(key = key, value = %raw, "Invalid setting, using default");
                    default
                }),
                None => default,
            }
        }

        Self {
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            cameras_file: lookup("CAMERAS_FILE").map(PathBuf::from),
            image_dir: lookup("IMAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/images")),
            thumb_dir: lookup("THUMB_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/thumbs")),
            detector_url: lookup("DETECTOR_URL")
                .unwrap_or_else(|| "http://127.0.0.1:9000".to_string()),
            reconcile_interval: Duration::from_secs(parsed(&lookup, "RECONCILE_INTERVAL_SEC", 10)),
            stop_grace: Duration::from_secs(parsed(&lookup, "STOP_GRACE_SEC", 5)),
            snapshot_timeout: Duration::from_secs(parsed(&lookup, "SNAPSHOT_TIMEOUT_SEC", 5)),
            iou_threshold: parsed(&lookup, "IOU_THRESHOLD", 0.15),
            retention_days: parsed(&lookup, "RETENTION_DAYS", 15),
            event_log_capacity: parsed(&lookup, "EVENT_LOG_CAPACITY", 2000),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Shared components
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub provider: Arc<dyn CameraProvider>,
    pub images: ImageStore,
    pub sink: Arc<dyn EventSink>,
    pub metrics: Arc<dyn MetricsSink>,
    pub realtime: Arc<RealtimeHub>,
    pub worker_manager: Arc<WorkerManager>,
}

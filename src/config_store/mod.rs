//! ConfigStore - Camera Configuration Provider
//!
//! ## Responsibilities
//!
//! - Camera inventory (identity, snapshot endpoint, monitoring policy)
//! - In-memory cache for frequent reads
//! - Source of the desired camera set driving worker reconciliation
//!
//! No worker reads configuration storage directly: a worker receives a
//! `CameraConfig` snapshot and is restarted when it changes.

mod repository;
mod types;

pub use repository::ConfigRepository;
pub use types::*;

use crate::error::Result;
use async_trait::async_trait;
use sqlx::MySqlPool;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Enumerates camera configuration records
#[async_trait]
pub trait CameraProvider: Send + Sync {
    /// Current camera set (enabled and disabled)
    async fn list_cameras(&self) -> Result<Vec<CameraConfig>>;
}

/// ConfigStore instance (MySQL backed)
pub struct ConfigStore {
    repo: ConfigRepository,
    /// In-memory cache for frequent reads
    cache: Arc<RwLock<Vec<CameraConfig>>>,
}

impl ConfigStore {
    /// Create new ConfigStore and load the initial cache
    pub async fn new(pool: MySqlPool) -> Result<Self> {
        let store = Self {
            repo: ConfigRepository::new(pool),
            cache: Arc::new(RwLock::new(Vec::new())),
        };

        store.refresh_cache().await?;

        Ok(store)
    }

    /// Refresh in-memory cache
    pub async fn refresh_cache(&self) -> Result<()> {
        let cameras = self.repo.get_all_cameras().await?;

        let mut cache = self.cache.write().await;
        *cache = cameras;

        tracing::debug!("ConfigStore cache refreshed: {} cameras", cache.len());

        Ok(())
    }

    /// Get cached cameras (fast read)
    pub async fn get_cached_cameras(&self) -> Vec<CameraConfig> {
        self.cache.read().await.clone()
    }
}

#[async_trait]
impl CameraProvider for ConfigStore {
    async fn list_cameras(&self) -> Result<Vec<CameraConfig>> {
        if let Err(e) = self.refresh_cache().await {
            // Keep serving the last known set; an empty list would stop every worker
            tracing::warn!(error = %e, "Camera refresh failed, using cached set");
        }
        Ok(self.get_cached_cameras().await)
    }
}

/// Fixed camera set held in memory (tests, no-database deployments)
#[derive(Default)]
pub struct StaticCameraProvider {
    cameras: RwLock<Vec<CameraConfig>>,
}

impl StaticCameraProvider {
    pub fn new(cameras: Vec<CameraConfig>) -> Self {
        Self {
            cameras: RwLock::new(cameras),
        }
    }

    /// Load a JSON array of camera records
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path).await?;
        let mut cameras: Vec<CameraConfig> = serde_json::from_slice(&raw)?;
        for camera in cameras.iter_mut().filter(|c| c.name.is_empty()) {
            camera.name = camera.camera_id.clone();
        }
        tracing::info!(
            path = %path.display(),
            count = cameras.len(),
            "Loaded cameras from file"
        );
        Ok(Self::new(cameras))
    }

    /// Replace the camera set
    pub async fn set(&self, cameras: Vec<CameraConfig>) {
        *self.cameras.write().await = cameras;
    }
}

#[async_trait]
impl CameraProvider for StaticCameraProvider {
    async fn list_cameras(&self) -> Result<Vec<CameraConfig>> {
        Ok(self.cameras.read().await.clone())
    }
}

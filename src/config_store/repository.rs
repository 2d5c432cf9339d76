//! ConfigStore Repository
//!
//! Database access layer for camera records

use super::types::*;
use crate::error::Result;
use sqlx::MySqlPool;

/// Camera repository for database operations
#[derive(Clone)]
pub struct ConfigRepository {
    pool: MySqlPool,
}

impl ConfigRepository {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Camera SELECT columns
    const CAMERA_COLUMNS: &'static str = r#"
        camera_id, name, nvr_base_url, username, password, channel_no,
        enabled, threshold, debounce_sec, polling_interval_sec,
        detect_person, detect_helmet, detect_mask
    "#;

    /// Get all cameras
    pub async fn get_all_cameras(&self) -> Result<Vec<CameraConfig>> {
        let query = format!(
            "SELECT {} FROM cameras ORDER BY camera_id",
            Self::CAMERA_COLUMNS
        );
        let cameras = sqlx::query_as::<_, CameraConfig>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(cameras)
    }
}

//! ConfigStore data types
//!
//! Camera identity and monitoring policy

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::time::Duration;

/// Default detection confidence threshold
pub const DEFAULT_THRESHOLD: f32 = 0.5;
/// Default debounce interval in seconds
pub const DEFAULT_DEBOUNCE_SEC: i32 = 5;
/// Default poll interval in seconds
pub const DEFAULT_POLLING_INTERVAL_SEC: i32 = 2;

/// Camera configuration snapshot.
///
/// A running worker holds an immutable copy; changes reach it only through
/// an explicit restart. Only `camera_id`, `nvr_base_url` and `channel_no`
/// are required when deserializing; the rest fall back to the defaults of
/// [`CameraConfig::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CameraConfig {
    pub camera_id: String,
    #[serde(default)]
    pub name: String,
    /// NVR / camera base URL, e.g. `https://10.0.0.5`
    pub nvr_base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// ISAPI channel selector (e.g. 101 = channel 1 main stream)
    pub channel_no: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Detection confidence threshold (0.0-1.0)
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_debounce_sec")]
    pub debounce_sec: i32,
    #[serde(default = "default_polling_interval_sec")]
    pub polling_interval_sec: i32,
    #[serde(default = "default_true")]
    pub detect_person: bool,
    #[serde(default = "default_true")]
    pub detect_helmet: bool,
    #[serde(default = "default_true")]
    pub detect_mask: bool,
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_debounce_sec() -> i32 {
    DEFAULT_DEBOUNCE_SEC
}

fn default_polling_interval_sec() -> i32 {
    DEFAULT_POLLING_INTERVAL_SEC
}

impl CameraConfig {
    /// Create a camera with default policy
    pub fn new(
        camera_id: impl Into<String>,
        nvr_base_url: impl Into<String>,
        channel_no: i32,
    ) -> Self {
        let camera_id = camera_id.into();
        Self {
            name: camera_id.clone(),
            camera_id,
            nvr_base_url: nvr_base_url.into(),
            username: String::new(),
            password: String::new(),
            channel_no,
            enabled: true,
            threshold: DEFAULT_THRESHOLD,
            debounce_sec: DEFAULT_DEBOUNCE_SEC,
            polling_interval_sec: DEFAULT_POLLING_INTERVAL_SEC,
            detect_person: true,
            detect_helmet: true,
            detect_mask: true,
        }
    }

    /// Snapshot endpoint (ISAPI picture API)
    pub fn snapshot_url(&self) -> String {
        format!(
            "{}/ISAPI/Streaming/channels/{}/picture",
            self.nvr_base_url.trim_end_matches('/'),
            self.channel_no
        )
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_sec.max(0) as u64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_sec.max(0) as u64)
    }

    /// Reject records a worker cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.camera_id.is_empty() {
            return Err(crate::Error::Config("camera_id is empty".to_string()));
        }
        if self.nvr_base_url.is_empty() {
            return Err(crate::Error::Config(format!(
                "camera {} has no base URL",
                self.camera_id
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(crate::Error::Config(format!(
                "camera {} threshold {} outside 0.0-1.0",
                self.camera_id, self.threshold
            )));
        }
        if self.debounce_sec < 0 || self.polling_interval_sec < 0 {
            return Err(crate::Error::Config(format!(
                "camera {} has a negative interval",
                self.camera_id
            )));
        }
        Ok(())
    }
}

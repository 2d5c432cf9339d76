//! SnapshotService - Still Image Capture from Cameras
//!
//! ## Responsibilities
//!
//! - HTTP snapshot capture from the camera's ISAPI picture endpoint
//! - Basic network-credential auth, bounded request timeout
//! - Failure classification (unreachable, non-success status, empty body)
//!
//! Cameras on site networks commonly present self-signed certificates,
//! so certificate validation is disabled for this client only.

use crate::config_store::CameraConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Source of raw snapshot bytes for one camera
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Fetch one still image. Network errors, non-success status and
    /// empty bodies all surface as `Error::Connectivity`.
    async fn fetch(&self, camera: &CameraConfig) -> Result<Vec<u8>>;
}

/// SnapshotService instance
pub struct SnapshotService {
    client: reqwest::Client,
}

impl SnapshotService {
    /// Create new SnapshotService
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self { client })
    }

    /// Capture via HTTP GET
    async fn capture_http(&self, camera: &CameraConfig) -> Result<Vec<u8>> {
        let url = camera.snapshot_url();

        let mut request = self.client.get(&url);
        if !camera.username.is_empty() {
            request = request.basic_auth(&camera.username, Some(&camera.password));
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::Connectivity(format!("GET {} failed: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(Error::Connectivity(format!(
                "Snapshot HTTP error: {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Connectivity(format!("snapshot read error: {}", e)))?;

        if bytes.is_empty() {
            return Err(Error::Connectivity("snapshot body is empty".to_string()));
        }

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SnapshotFetcher for SnapshotService {
    async fn fetch(&self, camera: &CameraConfig) -> Result<Vec<u8>> {
        let data = self.capture_http(camera).await?;
        tracing::trace!(
            camera_id = %camera.camera_id,
            size = data.len(),
            "Snapshot captured via HTTP"
        );
        Ok(data)
    }
}

//! HttpDetector - Remote Inference Server Adapter
//!
//! Posts the snapshot to a detection server (`POST {base}/v1/detect`,
//! multipart `image` + `conf`) and maps the returned boxes.

use super::{filter_by_threshold, DetectedBox, DetectionLabel, Detector, DetectorFactory, Frame};
use crate::config_store::CameraConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Default inference timeout
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Bounding box as returned by the detection server
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub label: String,
    pub conf: f32,
}

/// Detection server response
#[derive(Debug, Clone, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub detections: Vec<RemoteBox>,
}

impl DetectResponse {
    /// Map to detection boxes, dropping anything under `threshold`
    pub fn into_boxes(self, threshold: f32) -> Vec<DetectedBox> {
        let boxes = self
            .detections
            .into_iter()
            .map(|b| {
                let label = DetectionLabel::from(b.label.as_str());
                DetectedBox::new(label, b.conf, [b.x1, b.y1, b.x2, b.y2])
            })
            .collect();
        filter_by_threshold(boxes, threshold)
    }
}

/// Detector backed by a remote inference server
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
    threshold: f32,
}

impl HttpDetector {
    /// Create detector sharing an HTTP client
    pub fn new(client: reqwest::Client, base_url: String, threshold: f32) -> Self {
        Self {
            client,
            base_url,
            threshold,
        }
    }

    async fn request(&self, frame: &Frame) -> Result<Vec<DetectedBox>> {
        let url = format!("{}/v1/detect", self.base_url.trim_end_matches('/'));

        let form = Form::new()
            .part(
                "image",
                Part::bytes(frame.data.clone())
                    .file_name("snapshot.jpg")
                    .mime_str("image/jpeg")?,
            )
            .text("conf", self.threshold.to_string());

        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Inference(format!(
                "detector returned {}",
                resp.status()
            )));
        }

        let body: DetectResponse = resp.json().await?;
        Ok(body.into_boxes(self.threshold))
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> Vec<DetectedBox> {
        match self.request(frame).await {
            Ok(boxes) => boxes,
            Err(e) => {
                tracing::warn!(
                    base_url = %self.base_url,
                    error = %e,
                    "Detection request failed, treating as no detections"
                );
                Vec::new()
            }
        }
    }
}

/// Creates one `HttpDetector` per camera over a shared client
pub struct HttpDetectorFactory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDetectorFactory {
    pub fn new(base_url: String) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: String, timeout: Duration) -> Result<Self> {
        if base_url.is_empty() {
            return Err(Error::Config("detector URL is empty".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }
}

impl DetectorFactory for HttpDetectorFactory {
    fn create(&self, camera: &CameraConfig) -> Result<Arc<dyn Detector>> {
        Ok(Arc::new(HttpDetector::new(
            self.client.clone(),
            self.base_url.clone(),
            camera.threshold,
        )))
    }
}

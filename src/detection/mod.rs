//! Detection - Object Detection Contract
//!
//! ## Responsibilities
//!
//! - Detection data types (labels, scored boxes)
//! - Image decode into a `Frame`
//! - `Detector` capability consumed by camera workers
//!
//! Model loading and device selection live behind the detector backend;
//! a worker only needs `detect(frame) -> boxes`.

mod http_detector;

pub use http_detector::{HttpDetector, HttpDetectorFactory};

use crate::config_store::CameraConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Detection class label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionLabel {
    /// Subject to check for equipment
    Person,
    Helmet,
    Mask,
    /// Any class the rule set does not use
    #[serde(other)]
    Other,
}

impl DetectionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionLabel::Person => "person",
            DetectionLabel::Helmet => "helmet",
            DetectionLabel::Mask => "mask",
            DetectionLabel::Other => "other",
        }
    }
}

impl From<&str> for DetectionLabel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "person" => Self::Person,
            "helmet" | "hardhat" => Self::Helmet,
            "mask" => Self::Mask,
            _ => Self::Other,
        }
    }
}

/// Axis-aligned box in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Area, zero for degenerate boxes
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

/// One scored detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedBox {
    pub label: DetectionLabel,
    /// Confidence in [0, 1]
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl DetectedBox {
    pub fn new(label: DetectionLabel, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            label,
            confidence,
            bbox: BoundingBox::new(bbox[0], bbox[1], bbox[2], bbox[3]),
        }
    }
}

/// Decoded still image
pub struct Frame {
    /// Encoded bytes as received from the camera
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub image: image::DynamicImage,
}

impl Frame {
    /// Decode raw snapshot bytes
    pub fn decode(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::Decode("empty image".to_string()));
        }

        let image = image::load_from_memory(&data)
            .map_err(|e| Error::Decode(format!("undecodable image: {}", e)))?;

        Ok(Self {
            width: image.width(),
            height: image.height(),
            image,
            data,
        })
    }
}

/// Object detection backend.
///
/// Never fails across this boundary: backend errors are logged and
/// reported as an empty detection list.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Vec<DetectedBox>;
}

/// Builds the detector a worker uses for one camera (threshold is per camera)
pub trait DetectorFactory: Send + Sync {
    fn create(&self, camera: &CameraConfig) -> Result<Arc<dyn Detector>>;
}

/// Drop detections under the confidence threshold
pub fn filter_by_threshold(boxes: Vec<DetectedBox>, threshold: f32) -> Vec<DetectedBox> {
    boxes
        .into_iter()
        .filter(|b| b.confidence >= threshold)
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_from_str() {
        assert_eq!(DetectionLabel::from("Person"), DetectionLabel::Person);
        assert_eq!(DetectionLabel::from("helmet"), DetectionLabel::Helmet);
        assert_eq!(DetectionLabel::from("mask"), DetectionLabel::Mask);
        assert_eq!(DetectionLabel::from("forklift"), DetectionLabel::Other);
    }

    #[test]
    fn test_label_deserialize_unknown_is_other() {
        let label: DetectionLabel = serde_json::from_str("\"vest\"").unwrap();
        assert_eq!(label, DetectionLabel::Other);
        let label: DetectionLabel = serde_json::from_str("\"helmet\"").unwrap();
        assert_eq!(label, DetectionLabel::Helmet);
    }

    #[test]
    fn test_degenerate_box_area_is_zero() {
        assert_eq!(BoundingBox::new(10.0, 10.0, 5.0, 20.0).area(), 0.0);
        assert_eq!(BoundingBox::new(0.0, 0.0, 10.0, 20.0).area(), 200.0);
    }

    #[test]
    fn test_filter_by_threshold() {
        let boxes = vec![
            DetectedBox::new(DetectionLabel::Person, 0.9, [0.0, 0.0, 1.0, 1.0]),
            DetectedBox::new(DetectionLabel::Helmet, 0.3, [0.0, 0.0, 1.0, 1.0]),
            DetectedBox::new(DetectionLabel::Mask, 0.5, [0.0, 0.0, 1.0, 1.0]),
        ];
        let kept = filter_by_threshold(boxes, 0.5);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|b| b.label != DetectionLabel::Helmet));
    }

    #[test]
    fn test_decode_valid_png() {
        let frame = Frame::decode(test_support::png_bytes(8, 6)).unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
    }

    #[test]
    fn test_decode_rejects_empty_and_garbage() {
        assert!(matches!(Frame::decode(Vec::new()), Err(Error::Decode(_))));
        assert!(matches!(
            Frame::decode(b"not an image".to_vec()),
            Err(Error::Decode(_))
        ));
    }
}

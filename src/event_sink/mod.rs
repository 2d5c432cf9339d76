//! EventSink - Violation Event Persistence
//!
//! ## Responsibilities
//!
//! - `EventSink` contract consumed by camera workers
//! - Image files + thumbnails on the local filesystem (`ImageStore`)
//! - In-memory ring buffer sink (`EventLogService`)
//! - MySQL `events` table sink (`DetectionLogService`)
//!
//! Both sinks forward accepted events to the `RealtimeHub` when one is
//! attached. Delivery is at most once: a failed store or record drops the
//! event, the gate has already committed it.

mod detection_log;
mod event_log;
mod image_store;

pub use detection_log::DetectionLogService;
pub use event_log::EventLogService;
pub use image_store::{CleanupStats, ImageStore};

use crate::error::Result;
use crate::event_gate::EventCandidate;
use crate::realtime_hub::{EventLogMessage, HubMessage};
use crate::rule_engine::ViolationSummary;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque references to a stored event image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub image_path: String,
    /// Absent when thumbnail generation failed
    pub thumb_path: Option<String>,
}

/// Accepted, persisted violation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: u64,
    pub camera_id: String,
    pub timestamp: DateTime<Utc>,
    /// e.g. `no_helmet_no_mask`
    pub event_type: String,
    pub image_path: String,
    pub thumb_path: Option<String>,
    pub summary: ViolationSummary,
}

impl Event {
    fn from_candidate(event_id: u64, candidate: &EventCandidate, image: ImageRef) -> Self {
        Self {
            event_id,
            camera_id: candidate.camera_id.clone(),
            timestamp: candidate.captured_at,
            event_type: candidate.kind.as_event_type(),
            image_path: image.image_path,
            thumb_path: image.thumb_path,
            summary: candidate.summary.clone(),
        }
    }

    /// Hub notification for this event
    pub fn to_hub_message(&self) -> HubMessage {
        HubMessage::EventLog(EventLogMessage {
            event_id: self.event_id,
            camera_id: self.camera_id.clone(),
            event_type: self.event_type.clone(),
            timestamp: self.timestamp.to_rfc3339(),
            image_path: self.image_path.clone(),
            thumb_path: self.thumb_path.clone(),
        })
    }
}

/// Destination for accepted violation events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Persist the raw image, returning references to the stored files
    async fn store_image(
        &self,
        camera_id: &str,
        image: &[u8],
        captured_at: DateTime<Utc>,
    ) -> Result<ImageRef>;

    /// Persist the event record and notify live subscribers
    async fn record_event(&self, candidate: &EventCandidate, image: ImageRef) -> Result<Event>;
}

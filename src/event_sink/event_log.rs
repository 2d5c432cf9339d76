//! EventLogService - In-Memory Event Sink (Ring Buffer)

use super::{Event, EventSink, ImageRef, ImageStore};
use crate::error::Result;
use crate::event_gate::EventCandidate;
use crate::realtime_hub::RealtimeHub;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default ring buffer capacity
pub const DEFAULT_CAPACITY: usize = 2000;

/// Ring buffer for events
struct EventRingBuffer {
    events: VecDeque<Event>,
    capacity: usize,
    next_id: u64,
}

impl EventRingBuffer {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push(&mut self, event: Event) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn get_latest(&self, count: usize) -> Vec<Event> {
        self.events.iter().rev().take(count).cloned().collect()
    }

    fn get_by_camera(&self, camera_id: &str, count: usize) -> Vec<Event> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.camera_id == camera_id)
            .take(count)
            .cloned()
            .collect()
    }
}

/// EventLogService instance
pub struct EventLogService {
    buffer: RwLock<EventRingBuffer>,
    images: ImageStore,
    hub: Option<Arc<RealtimeHub>>,
}

impl EventLogService {
    /// Create new EventLogService
    pub fn new(capacity: usize, images: ImageStore) -> Self {
        Self {
            buffer: RwLock::new(EventRingBuffer::new(capacity)),
            images,
            hub: None,
        }
    }

    /// Forward recorded events to live subscribers
    pub fn with_hub(mut self, hub: Arc<RealtimeHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Get latest events (newest first)
    pub async fn get_latest(&self, count: usize) -> Vec<Event> {
        let buffer = self.buffer.read().await;
        buffer.get_latest(count)
    }

    /// Get events by camera (newest first)
    pub async fn get_by_camera(&self, camera_id: &str, count: usize) -> Vec<Event> {
        let buffer = self.buffer.read().await;
        buffer.get_by_camera(camera_id, count)
    }

    /// Get event count
    pub async fn count(&self) -> usize {
        let buffer = self.buffer.read().await;
        buffer.events.len()
    }
}

#[async_trait]
impl EventSink for EventLogService {
    async fn store_image(
        &self,
        camera_id: &str,
        image: &[u8],
        captured_at: DateTime<Utc>,
    ) -> Result<ImageRef> {
        self.images.save(camera_id, image, captured_at).await
    }

    async fn record_event(&self, candidate: &EventCandidate, image: ImageRef) -> Result<Event> {
        let event = {
            let mut buffer = self.buffer.write().await;
            let event = Event::from_candidate(buffer.next_id(), candidate, image);
            buffer.push(event.clone());
            event
        };

        tracing::debug!(event_id = event.event_id, "Event added to ring buffer");

        if let Some(hub) = &self.hub {
            hub.broadcast(event.to_hub_message()).await;
        }

        Ok(event)
    }
}

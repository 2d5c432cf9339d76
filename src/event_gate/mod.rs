//! EventGate - Debounce and Dedupe of Violation Events
//!
//! Decides whether a violation seen in one cycle becomes a persisted event:
//!
//! - Debounce: a candidate within `debounce` of the last accepted event is
//!   rejected regardless of content
//! - Dedupe: past the debounce window, a candidate whose signature equals the
//!   last accepted signature is rejected
//!
//! Each rejection path increments its own counter.

use crate::metrics::MetricsSink;
use crate::rule_engine::{ViolationKind, ViolationSummary};
use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::time::Duration;

/// A violation proposed for emission
#[derive(Debug, Clone)]
pub struct EventCandidate {
    pub camera_id: String,
    pub kind: ViolationKind,
    pub captured_at: DateTime<Utc>,
    /// Raw image bytes; ownership passes to the event sink on acceptance
    pub image: Vec<u8>,
    pub summary: ViolationSummary,
    pub signature: String,
}

impl EventCandidate {
    /// Build a candidate, `None` when the summary has no violation
    pub fn from_summary(
        camera_id: &str,
        summary: ViolationSummary,
        image: Vec<u8>,
        captured_at: DateTime<Utc>,
    ) -> Option<Self> {
        let kind = summary.violation_kind()?;
        let signature = signature(&kind, &summary);

        Some(Self {
            camera_id: camera_id.to_string(),
            kind,
            captured_at,
            image,
            summary,
            signature,
        })
    }
}

/// Content signature: SHA-1 over the event type and the serialized summary
pub fn signature(kind: &ViolationKind, summary: &ViolationSummary) -> String {
    let payload =
        serde_json::to_string(summary).unwrap_or_else(|_| format!("{:?}", summary));

    let mut hasher = Sha1::new();
    hasher.update(kind.as_event_type().as_bytes());
    hasher.update(b":");
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Last accepted event of one camera
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateState {
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_signature: Option<String>,
}

/// Gate outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Accept,
    DebounceSuppressed,
    DedupeSuppressed,
}

/// Per-camera gating policy
pub struct EventGate {
    camera_id: String,
    debounce: chrono::Duration,
    metrics: Arc<dyn MetricsSink>,
}

impl EventGate {
    pub fn new(camera_id: &str, debounce: Duration, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            debounce: chrono::Duration::milliseconds(debounce.as_millis() as i64),
            metrics,
        }
    }

    /// Evaluate a candidate; on acceptance it becomes the new last event.
    ///
    /// A candidate timestamped before the last accepted event falls inside
    /// the debounce window, so `last_event_at` never moves backwards.
    pub fn evaluate(&self, state: &mut GateState, candidate: &EventCandidate) -> GateDecision {
        if let Some(last) = state.last_event_at {
            if candidate.captured_at - last < self.debounce {
                self.metrics.record_debounce_hit(&self.camera_id);
                tracing::debug!(
                    camera_id = %self.camera_id,
                    event_type = %candidate.kind,
                    "Event suppressed (debounce)"
                );
                return GateDecision::DebounceSuppressed;
            }
        }

        if state.last_signature.as_deref() == Some(candidate.signature.as_str()) {
            self.metrics.record_dedupe_hit(&self.camera_id);
            tracing::debug!(
                camera_id = %self.camera_id,
                event_type = %candidate.kind,
                "Event suppressed (dedupe)"
            );
            return GateDecision::DedupeSuppressed;
        }

        state.last_event_at = Some(candidate.captured_at);
        state.last_signature = Some(candidate.signature.clone());
        GateDecision::Accept
    }
}

//! Metrics - Per-Camera Telemetry
//!
//! Workers receive a `MetricsSink` at construction; nothing records into
//! process-global objects directly. `RecorderMetrics` forwards to the
//! `metrics` facade (exporter installed by the host process, if any),
//! `InMemoryMetrics` keeps counters readable in-process.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Telemetry consumed by camera workers and the event gate
pub trait MetricsSink: Send + Sync {
    /// Frames per second derived from wall-clock cycle duration
    fn record_fps(&self, camera_id: &str, fps: f64);
    fn record_inference_latency(&self, camera_id: &str, latency: Duration);
    /// Snapshot fetch or decode failure (`kind` = error kind label)
    fn record_fetch_error(&self, camera_id: &str, kind: &str);
    /// Current backoff delay (zero when polling normally)
    fn record_backoff(&self, camera_id: &str, delay: Duration);
    /// Fetch outcome while the camera is offline
    fn record_reconnect(&self, camera_id: &str, success: bool);
    fn record_debounce_hit(&self, camera_id: &str);
    fn record_dedupe_hit(&self, camera_id: &str);
    fn record_event(&self, camera_id: &str, event_type: &str);
    fn record_sink_error(&self, camera_id: &str);
    /// Failure caught at the cycle boundary
    fn record_cycle_error(&self, camera_id: &str, kind: &str);
}

/// Forwards to the `metrics` crate recorder
#[derive(Debug, Default, Clone)]
pub struct RecorderMetrics;

impl MetricsSink for RecorderMetrics {
    fn record_fps(&self, camera_id: &str, fps: f64) {
        ::metrics::gauge!("ppe_camera_fps", "camera_id" => camera_id.to_string()).set(fps);
    }

    fn record_inference_latency(&self, camera_id: &str, latency: Duration) {
        ::metrics::histogram!("ppe_inference_latency_seconds", "camera_id" => camera_id.to_string())
            .record(latency.as_secs_f64());
    }

    fn record_fetch_error(&self, camera_id: &str, kind: &str) {
        ::metrics::counter!(
            "ppe_fetch_errors_total",
            "camera_id" => camera_id.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    fn record_backoff(&self, camera_id: &str, delay: Duration) {
        ::metrics::gauge!("ppe_backoff_seconds", "camera_id" => camera_id.to_string())
            .set(delay.as_secs_f64());
    }

    fn record_reconnect(&self, camera_id: &str, success: bool) {
        let name = if success {
            "ppe_camera_reconnect_success_total"
        } else {
            "ppe_camera_reconnect_fail_total"
        };
        ::metrics::counter!(name, "camera_id" => camera_id.to_string()).increment(1);
    }

    fn record_debounce_hit(&self, camera_id: &str) {
        ::metrics::counter!("ppe_event_debounce_hits_total", "camera_id" => camera_id.to_string())
            .increment(1);
    }

    fn record_dedupe_hit(&self, camera_id: &str) {
        ::metrics::counter!("ppe_event_dedupe_hits_total", "camera_id" => camera_id.to_string())
            .increment(1);
    }

    fn record_event(&self, camera_id: &str, event_type: &str) {
        ::metrics::counter!(
            "ppe_events_total",
            "camera_id" => camera_id.to_string(),
            "type" => event_type.to_string()
        )
        .increment(1);
    }

    fn record_sink_error(&self, camera_id: &str) {
        ::metrics::counter!("ppe_sink_errors_total", "camera_id" => camera_id.to_string())
            .increment(1);
    }

    fn record_cycle_error(&self, camera_id: &str, kind: &str) {
        ::metrics::counter!(
            "ppe_cycle_errors_total",
            "camera_id" => camera_id.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }
}

/// Counters for one camera
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraCounters {
    pub fetch_errors: u64,
    pub decode_errors: u64,
    /// Every backoff delay recorded, in order
    pub backoff_delays: Vec<Duration>,
    pub reconnect_success: u64,
    pub reconnect_fail: u64,
    pub debounce_hits: u64,
    pub dedupe_hits: u64,
    pub events: u64,
    pub sink_errors: u64,
    pub cycle_errors: u64,
    pub inference_samples: u64,
    pub last_fps: Option<f64>,
}

/// In-process counters keyed by camera
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    cameras: Mutex<HashMap<String, CameraCounters>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of one camera's counters (zeroed if never recorded)
    pub fn snapshot(&self, camera_id: &str) -> CameraCounters {
        self.cameras
            .lock()
            .get(camera_id)
            .cloned()
            .unwrap_or_default()
    }

    fn update(&self, camera_id: &str, f: impl FnOnce(&mut CameraCounters)) {
        let mut cameras = self.cameras.lock();
        f(cameras.entry(camera_id.to_string()).or_default());
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_fps(&self, camera_id: &str, fps: f64) {
        self.update(camera_id, |c| c.last_fps = Some(fps));
    }

    fn record_inference_latency(&self, camera_id: &str, _latency: Duration) {
        self.update(camera_id, |c| c.inference_samples += 1);
    }

    fn record_fetch_error(&self, camera_id: &str, kind: &str) {
        self.update(camera_id, |c| {
            c.fetch_errors += 1;
            if kind == "decode" {
                c.decode_errors += 1;
            }
        });
    }

    fn record_backoff(&self, camera_id: &str, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        self.update(camera_id, |c| c.backoff_delays.push(delay));
    }

    fn record_reconnect(&self, camera_id: &str, success: bool) {
        self.update(camera_id, |c| {
            if success {
                c.reconnect_success += 1;
            } else {
                c.reconnect_fail += 1;
            }
        });
    }

    fn record_debounce_hit(&self, camera_id: &str) {
        self.update(camera_id, |c| c.debounce_hits += 1);
    }

    fn record_dedupe_hit(&self, camera_id: &str) {
        self.update(camera_id, |c| c.dedupe_hits += 1);
    }

    fn record_event(&self, camera_id: &str, _event_type: &str) {
        self.update(camera_id, |c| c.events += 1);
    }

    fn record_sink_error(&self, camera_id: &str) {
        self.update(camera_id, |c| c.sink_errors += 1);
    }

    fn record_cycle_error(&self, camera_id: &str, _kind: &str) {
        self.update(camera_id, |c| c.cycle_errors += 1);
    }
}

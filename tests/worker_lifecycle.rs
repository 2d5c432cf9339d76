//! End-to-end worker lifecycle: manager + workers + real event log sink,
//! with fake cameras and detector.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ppe_camserver::camera_worker::{WorkerDeps, WorkerPhase};
use ppe_camserver::config_store::CameraConfig;
use ppe_camserver::detection::{
    DetectedBox, DetectionLabel, Detector, DetectorFactory, Frame,
};
use ppe_camserver::event_gate::EventCandidate;
use ppe_camserver::event_sink::{Event, EventLogService, EventSink, ImageRef, ImageStore};
use ppe_camserver::metrics::InMemoryMetrics;
use ppe_camserver::realtime_hub::RealtimeHub;
use ppe_camserver::snapshot_service::SnapshotFetcher;
use ppe_camserver::worker_manager::WorkerManager;
use ppe_camserver::{Error, Result};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

fn jpeg_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(640, 480, image::Rgb([30, 60, 90]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

/// Per-camera canned snapshot responses
struct ScriptedCameras {
    offline: Vec<String>,
    corrupt: Vec<String>,
    image: Vec<u8>,
}

#[async_trait]
impl SnapshotFetcher for ScriptedCameras {
    async fn fetch(&self, camera: &CameraConfig) -> Result<Vec<u8>> {
        if self.offline.contains(&camera.camera_id) {
            return Err(Error::Connectivity("connection refused".to_string()));
        }
        if self.corrupt.contains(&camera.camera_id) {
            return Ok(b"\xff\xd8 truncated".to_vec());
        }
        Ok(self.image.clone())
    }
}

/// Reports a person wearing a helmet but no mask on every frame
struct HelmetOnlyDetector;

#[async_trait]
impl Detector for HelmetOnlyDetector {
    async fn detect(&self, _frame: &Frame) -> Vec<DetectedBox> {
        vec![
            DetectedBox::new(DetectionLabel::Person, 0.92, [0.0, 0.0, 100.0, 200.0]),
            DetectedBox::new(DetectionLabel::Helmet, 0.88, [10.0, 10.0, 90.0, 60.0]),
        ]
    }
}

struct HelmetOnlyFactory;

impl DetectorFactory for HelmetOnlyFactory {
    fn create(&self, _camera: &CameraConfig) -> Result<Arc<dyn Detector>> {
        Ok(Arc::new(HelmetOnlyDetector))
    }
}

/// Sink whose storage is always unavailable
#[derive(Default)]
struct BrokenSink {
    attempts: Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl EventSink for BrokenSink {
    async fn store_image(
        &self,
        camera_id: &str,
        _image: &[u8],
        _captured_at: DateTime<Utc>,
    ) -> Result<ImageRef> {
        *self.attempts.lock().entry(camera_id.to_string()).or_default() += 1;
        Err(Error::Sink("storage offline".to_string()))
    }

    async fn record_event(&self, _candidate: &EventCandidate, _image: ImageRef) -> Result<Event> {
        Err(Error::Sink("storage offline".to_string()))
    }
}

fn camera(id: &str) -> CameraConfig {
    let mut camera = CameraConfig::new(id, "https://10.0.0.5", 101);
    camera.polling_interval_sec = 1;
    camera
}

#[tokio::test]
async fn violation_is_stored_once_and_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let images = ImageStore::new(dir.path().join("images"), dir.path().join("thumbs"))
        .await
        .unwrap();
    let hub = Arc::new(RealtimeHub::new());
    let (_, mut rx) = hub.register().await;
    let event_log = Arc::new(EventLogService::new(100, images).with_hub(hub.clone()));
    let metrics = Arc::new(InMemoryMetrics::new());

    let fetcher = Arc::new(ScriptedCameras {
        offline: vec!["cam-down".to_string()],
        corrupt: Vec::new(),
        image: jpeg_bytes(),
    });
    let deps = WorkerDeps::new(
        fetcher,
        Arc::new(HelmetOnlyFactory),
        event_log.clone(),
        metrics.clone(),
    );
    let manager = WorkerManager::new(deps, Duration::from_secs(5));

    let started = manager
        .start_all(&[camera("cam-ok"), camera("cam-down")])
        .await;
    assert_eq!(started.len(), 2);

    // First accepted event reaches live subscribers
    let json = rx.recv().await.unwrap();
    let message: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(message["type"], "event_log");
    assert_eq!(message["data"]["camera_id"], "cam-ok");
    assert_eq!(message["data"]["event_type"], "no_mask");

    // Let a few more cycles run inside the debounce window
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let events = event_log.get_latest(10).await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert!(std::path::Path::new(&event.image_path).exists());
    let thumb = event.thumb_path.as_ref().expect("thumbnail");
    assert!(std::path::Path::new(thumb).exists());
    assert_eq!(event.summary.total_subjects, 1);
    assert_eq!(event.summary.violations, 1);

    let ok = metrics.snapshot("cam-ok");
    assert_eq!(ok.events, 1);
    assert!(ok.debounce_hits >= 1);
    assert_eq!(ok.fetch_errors, 0);

    // The unreachable camera backs off without disturbing the other one
    let down = metrics.snapshot("cam-down");
    assert!(down.fetch_errors >= 2);
    assert_eq!(&down.backoff_delays[..2], &[Duration::from_secs(1), Duration::from_secs(2)]);
    assert_eq!(down.events, 0);

    let report = manager.reconcile(&[camera("cam-ok")]).await;
    assert_eq!(report.stopped, vec!["cam-down"]);
    assert_eq!(manager.live_cameras(), vec!["cam-ok"]);

    manager.stop_all().await;
    assert!(manager.live_cameras().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failing_sink_and_corrupt_frames_never_kill_workers() {
    let sink = Arc::new(BrokenSink::default());
    let metrics = Arc::new(InMemoryMetrics::new());
    let fetcher = Arc::new(ScriptedCameras {
        offline: Vec::new(),
        corrupt: vec!["cam-corrupt".to_string()],
        image: jpeg_bytes(),
    });
    let deps = WorkerDeps::new(fetcher, Arc::new(HelmetOnlyFactory), sink.clone(), metrics.clone());
    let manager = WorkerManager::new(deps, Duration::from_secs(5));

    manager
        .start_all(&[camera("cam-sink"), camera("cam-corrupt")])
        .await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    for status in manager.worker_statuses() {
        assert!(status.alive, "{} died", status.camera_id);
        assert_eq!(status.phase, WorkerPhase::Polling);
    }

    // Debounce 5s over 30s: one attempt, then dedupe forever (same summary)
    let sink_metrics = metrics.snapshot("cam-sink");
    assert_eq!(sink_metrics.sink_errors, 1);
    assert_eq!(sink.attempts.lock().get("cam-sink").copied(), Some(1));
    assert!(sink_metrics.dedupe_hits > 0);

    // Corrupt frames: counted, polled at the normal interval, no backoff
    let corrupt = metrics.snapshot("cam-corrupt");
    assert!(corrupt.decode_errors >= 10);
    assert_eq!(corrupt.decode_errors, corrupt.fetch_errors);
    assert!(corrupt.backoff_delays.is_empty());

    manager.stop_all().await;
}

//! CameraWorker - Per-Camera Poll Loop
//!
//! ## Responsibilities
//!
//! - One camera's cycle: fetch -> decode -> detect -> classify -> gate -> emit
//! - Exponential backoff while the camera (or its detector) is unavailable
//! - Lost / recovered tracking and per-camera telemetry
//!
//! ## Phases
//!
//! `Starting -> Polling -> (BackingOff <-> Polling) -> Stopping -> Stopped`
//!
//! Cancellation is observed between cycles and during sleeps; a cycle that
//! has started always runs to completion (the fetch is bounded by its own
//! request timeout).

mod backoff;
mod connection;

pub use backoff::{Backoff, BACKOFF_CAP, BACKOFF_SEED};
pub use connection::{ConnectionEvent, ConnectionStatus, ConnectionTracker};

use crate::config_store::CameraConfig;
use crate::detection::{filter_by_threshold, Detector, DetectorFactory, Frame};
use crate::error::{Error, Result};
use crate::event_gate::{EventCandidate, EventGate, GateDecision, GateState};
use crate::event_sink::EventSink;
use crate::metrics::MetricsSink;
use crate::rule_engine::{classify, RuleConfig, DEFAULT_IOU_THRESHOLD};
use crate::snapshot_service::SnapshotFetcher;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Worker lifecycle phase, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Starting,
    Polling,
    BackingOff,
    Stopping,
    Stopped,
}

impl WorkerPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerPhase::Stopped)
    }
}

/// Collaborators shared by every worker
#[derive(Clone)]
pub struct WorkerDeps {
    pub fetcher: Arc<dyn SnapshotFetcher>,
    pub detector_factory: Arc<dyn DetectorFactory>,
    pub sink: Arc<dyn EventSink>,
    pub metrics: Arc<dyn MetricsSink>,
    pub iou_threshold: f32,
}

impl WorkerDeps {
    pub fn new(
        fetcher: Arc<dyn SnapshotFetcher>,
        detector_factory: Arc<dyn DetectorFactory>,
        sink: Arc<dyn EventSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            fetcher,
            detector_factory,
            sink,
            metrics,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }

    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }
}

/// State owned and mutated only by the camera's own worker
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub phase: WorkerPhase,
    /// Last accepted event timestamp and signature
    pub gate: GateState,
    pub backoff: Backoff,
    pub connection: ConnectionTracker,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            phase: WorkerPhase::Starting,
            gate: GateState::default(),
            backoff: Backoff::default(),
            connection: ConnectionTracker::new(),
        }
    }
}

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Image analysed; gate decision if a violation was found
    Processed(Option<GateDecision>),
    /// Corrupt frame, retried at the normal interval
    DecodeFailed,
    /// No usable image or the cycle failed (error kind); back off
    Failed(&'static str),
}

/// Wall-clock timestamps that advance with the runtime clock
#[derive(Debug, Clone, Copy)]
struct WallClock {
    origin_utc: DateTime<Utc>,
    origin: Instant,
}

impl WallClock {
    fn new() -> Self {
        Self {
            origin_utc: Utc::now(),
            origin: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin_utc + elapsed
    }
}

/// Poll loop for one camera
pub struct CameraWorker {
    camera: CameraConfig,
    deps: WorkerDeps,
    rules: RuleConfig,
    gate: EventGate,
    detector: Option<Arc<dyn Detector>>,
    state: WorkerState,
    clock: WallClock,
    phase_tx: watch::Sender<WorkerPhase>,
}

impl CameraWorker {
    pub fn new(camera: CameraConfig, deps: WorkerDeps) -> Self {
        let rules = RuleConfig::for_camera(&camera, deps.iou_threshold);
        let gate = EventGate::new(&camera.camera_id, camera.debounce(), deps.metrics.clone());
        let (phase_tx, _) = watch::channel(WorkerPhase::Starting);

        Self {
            camera,
            deps,
            rules,
            gate,
            detector: None,
            state: WorkerState::default(),
            clock: WallClock::new(),
            phase_tx,
        }
    }

    pub fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    /// Phase updates for observers (the manager never mutates worker state)
    pub fn subscribe(&self) -> watch::Receiver<WorkerPhase> {
        self.phase_tx.subscribe()
    }

    fn set_phase(&mut self, phase: WorkerPhase) {
        if self.state.phase != phase {
            tracing::debug!(camera_id = %self.camera.camera_id, ?phase, "Worker phase");
        }
        self.state.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    /// Run until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            camera_id = %self.camera.camera_id,
            poll_interval_sec = self.camera.polling_interval_sec,
            debounce_sec = self.camera.debounce_sec,
            "Camera worker started"
        );

        if self.start(&cancel).await {
            self.poll_loop(&cancel).await;
        }

        self.set_phase(WorkerPhase::Stopping);
        self.deps.metrics.record_backoff(&self.camera.camera_id, Duration::ZERO);
        self.set_phase(WorkerPhase::Stopped);
        tracing::info!(camera_id = %self.camera.camera_id, "Camera worker stopped");
    }

    /// Starting phase: build the detector, backing off until it succeeds.
    /// Returns false when cancelled first.
    async fn start(&mut self, cancel: &CancellationToken) -> bool {
        self.set_phase(WorkerPhase::Starting);

        loop {
            if cancel.is_cancelled() {
                return false;
            }

            match self.initialize() {
                Ok(()) => return true,
                Err(e) => {
                    tracing::error!(
                        camera_id = %self.camera.camera_id,
                        error = %e,
                        "Detector initialization failed"
                    );
                    self.deps
                        .metrics
                        .record_cycle_error(&self.camera.camera_id, e.kind());
                    let delay = self.next_backoff();
                    if !sleep_or_cancel(cancel, delay).await {
                        return false;
                    }
                }
            }
        }
    }

    /// Create the detector for this camera's threshold
    pub fn initialize(&mut self) -> Result<()> {
        let detector = self
            .deps
            .detector_factory
            .create(&self.camera)
            .map_err(|e| Error::Inference(e.to_string()))?;
        self.detector = Some(detector);
        self.state.backoff.reset();
        Ok(())
    }

    async fn poll_loop(&mut self, cancel: &CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            self.set_phase(WorkerPhase::Polling);

            let started = Instant::now();
            let outcome = self.run_cycle().await;

            let delay = match outcome {
                CycleOutcome::Failed(_) => {
                    self.set_phase(WorkerPhase::BackingOff);
                    self.next_backoff()
                }
                CycleOutcome::Processed(_) | CycleOutcome::DecodeFailed => {
                    self.camera.poll_interval().saturating_sub(started.elapsed())
                }
            };

            if !sleep_or_cancel(cancel, delay).await {
                return;
            }
        }
    }

    fn next_backoff(&mut self) -> Duration {
        let delay = self.state.backoff.next_delay();
        self.deps.metrics.record_backoff(&self.camera.camera_id, delay);
        tracing::debug!(
            camera_id = %self.camera.camera_id,
            delay_ms = delay.as_millis() as u64,
            "Backing off"
        );
        delay
    }

    /// One poll cycle. Never fails: every error, including a panic in any
    /// step, is classified into the outcome.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let result = AssertUnwindSafe(self.cycle()).catch_unwind().await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(camera_id = %self.camera.camera_id, "Poll cycle panicked");
                self.deps
                    .metrics
                    .record_cycle_error(&self.camera.camera_id, "panic");
                CycleOutcome::Failed("panic")
            }
        }
    }

    /// Fetch, then hand the image to `process`
    async fn cycle(&mut self) -> CycleOutcome {
        let started = Instant::now();
        let camera_id = self.camera.camera_id.clone();
        let captured_at = self.clock.now();

        let data = match self.deps.fetcher.fetch(&self.camera).await {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(camera_id = %camera_id, error = %e, "Snapshot fetch failed");
                self.deps.metrics.record_fetch_error(&camera_id, e.kind());
                self.state
                    .connection
                    .update(&camera_id, false, self.deps.metrics.as_ref());
                return CycleOutcome::Failed(e.kind());
            }
        };

        self.state
            .connection
            .update(&camera_id, true, self.deps.metrics.as_ref());
        if self.state.backoff.reset() {
            self.deps.metrics.record_backoff(&camera_id, Duration::ZERO);
        }

        match self.process(data, captured_at).await {
            Ok(decision) => {
                let elapsed = started.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    self.deps.metrics.record_fps(&camera_id, 1.0 / elapsed);
                }
                CycleOutcome::Processed(decision)
            }
            Err(e) if !e.is_connectivity() => {
                tracing::warn!(camera_id = %camera_id, error = %e, "Discarding corrupt frame");
                self.deps.metrics.record_fetch_error(&camera_id, e.kind());
                CycleOutcome::DecodeFailed
            }
            Err(e) => {
                tracing::error!(camera_id = %camera_id, error = %e, "Poll cycle failed");
                self.deps.metrics.record_cycle_error(&camera_id, e.kind());
                CycleOutcome::Failed(e.kind())
            }
        }
    }

    /// Decode -> detect -> classify -> gate -> emit
    async fn process(
        &mut self,
        data: Vec<u8>,
        captured_at: DateTime<Utc>,
    ) -> Result<Option<GateDecision>> {
        let frame = Frame::decode(data)?;
        let detector = self
            .detector
            .clone()
            .ok_or_else(|| Error::Internal("detector not initialized".to_string()))?;

        let inference_started = Instant::now();
        let boxes = detector.detect(&frame).await;
        self.deps
            .metrics
            .record_inference_latency(&self.camera.camera_id, inference_started.elapsed());

        let boxes = filter_by_threshold(boxes, self.camera.threshold);
        let summary = classify(&boxes, &self.rules);

        tracing::debug!(
            camera_id = %self.camera.camera_id,
            detections = boxes.len(),
            subjects = summary.total_subjects,
            violations = summary.violations,
            "Frame classified"
        );

        let candidate = match EventCandidate::from_summary(
            &self.camera.camera_id,
            summary,
            frame.data,
            captured_at,
        ) {
            Some(c) => c,
            None => return Ok(None),
        };

        let decision = self.gate.evaluate(&mut self.state.gate, &candidate);
        if decision == GateDecision::Accept {
            self.emit(candidate).await;
        }

        Ok(Some(decision))
    }

    /// Store the image and record the event; failures drop the event
    async fn emit(&self, candidate: EventCandidate) {
        let camera_id = &self.camera.camera_id;
        let sink = &self.deps.sink;

        let image = match sink
            .store_image(camera_id, &candidate.image, candidate.captured_at)
            .await
        {
            Ok(image) => image,
            Err(e) => {
                tracing::error!(
                    camera_id = %camera_id,
                    error = %e,
                    "Event image store failed, event dropped"
                );
                self.deps.metrics.record_sink_error(camera_id);
                return;
            }
        };

        match sink.record_event(&candidate, image).await {
            Ok(event) => {
                tracing::info!(
                    camera_id = %camera_id,
                    event_id = event.event_id,
                    event_type = %event.event_type,
                    "Violation event emitted"
                );
                self.deps.metrics.record_event(camera_id, &event.event_type);
            }
            Err(e) => {
                tracing::error!(
                    camera_id = %camera_id,
                    error = %e,
                    "Event record failed, event dropped"
                );
                self.deps.metrics.record_sink_error(camera_id);
            }
        }
    }
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

//! WorkerManager - Camera Worker Lifecycle
//!
//! ## Responsibilities
//!
//! - One `CameraWorker` task per enabled camera, never two for the same id
//! - Start / stop / restart / reconcile against the desired camera set
//! - Bounded, parallel shutdown
//!
//! Lifecycle operations are serialized by `ops`; the worker registry lock
//! is only held for map bookkeeping, never across a wait.

use crate::camera_worker::{CameraWorker, WorkerDeps, WorkerPhase};
use crate::config_store::{CameraConfig, CameraProvider};
use crate::error::{Error, Result};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default time a worker gets to observe cancellation
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Bookkeeping for one live worker
struct ManagedWorker {
    camera: CameraConfig,
    cancel: CancellationToken,
    phase: watch::Receiver<WorkerPhase>,
    task_handle: JoinHandle<()>,
}

impl ManagedWorker {
    fn is_alive(&self) -> bool {
        !self.task_handle.is_finished()
    }
}

/// How a stop completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Graceful,
    /// Grace period elapsed; the task was aborted and dropped from bookkeeping.
    ///
    /// The abort can interrupt a cycle mid-flight, so an in-progress fetch is
    /// cut short and an image stored just before the abort may have no event
    /// row. A worker stuck past its grace period is never left running, so a
    /// later start for the same camera cannot overlap it.
    Forced,
}

/// Observed state of one worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub camera_id: String,
    pub phase: WorkerPhase,
    pub alive: bool,
}

/// Changes applied by one `reconcile` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub restarted: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.restarted.is_empty()
    }
}

/// WorkerManager instance
pub struct WorkerManager {
    deps: WorkerDeps,
    grace: Duration,
    workers: Mutex<HashMap<String, ManagedWorker>>,
    ops: tokio::sync::Mutex<()>,
    /// Parent of every worker token
    cancel: CancellationToken,
}

impl WorkerManager {
    /// Create new WorkerManager
    pub fn new(deps: WorkerDeps, grace: Duration) -> Self {
        Self {
            deps,
            grace,
            workers: Mutex::new(HashMap::new()),
            ops: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    /// Start a worker for every enabled camera that has none.
    /// Returns the ids started.
    pub async fn start_all(&self, cameras: &[CameraConfig]) -> Vec<String> {
        let _ops = self.ops.lock().await;

        let mut started = Vec::new();
        for camera in cameras.iter().filter(|c| c.enabled) {
            if !is_runnable(camera) {
                continue;
            }
            if self.spawn_locked(camera.clone()) {
                started.push(camera.camera_id.clone());
            }
        }

        if !started.is_empty() {
            tracing::info!(count = started.len(), "Camera workers started");
        }
        started
    }

    /// Cancel one worker and wait for it (bounded by the grace period)
    pub async fn stop_worker(&self, camera_id: &str) -> Result<StopOutcome> {
        let _ops = self.ops.lock().await;
        self.stop_locked(camera_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("no worker for camera {}", camera_id)))
    }

    /// Stop (if running) then start with the new configuration.
    /// A disabled configuration only stops the worker.
    pub async fn restart_worker(&self, camera_id: &str, config: CameraConfig) -> Result<()> {
        if config.camera_id != camera_id {
            return Err(Error::Config(format!(
                "restart of {} with config for {}",
                camera_id, config.camera_id
            )));
        }
        config.validate()?;

        let _ops = self.ops.lock().await;
        self.stop_locked(camera_id).await;
        if config.enabled {
            self.spawn_locked(config);
        }

        tracing::info!(camera_id = %camera_id, "Camera worker restarted");
        Ok(())
    }

    /// Converge the live set on the enabled cameras in `desired`.
    ///
    /// Removed or disabled cameras are stopped, new ones started, changed
    /// ones restarted; unchanged workers are left alone.
    pub async fn reconcile(&self, desired: &[CameraConfig]) -> ReconcileReport {
        let _ops = self.ops.lock().await;

        let desired: HashMap<&str, &CameraConfig> = desired
            .iter()
            .filter(|c| c.enabled && is_runnable(c))
            .map(|c| (c.camera_id.as_str(), c))
            .collect();

        let mut report = ReconcileReport::default();
        let mut to_stop = Vec::new();
        {
            let workers = self.workers.lock();
            for (id, managed) in workers.iter() {
                match desired.get(id.as_str()) {
                    None => {
                        to_stop.push(id.clone());
                        report.stopped.push(id.clone());
                    }
                    Some(camera) if **camera != managed.camera || !managed.is_alive() => {
                        to_stop.push(id.clone());
                        report.restarted.push(id.clone());
                    }
                    Some(_) => {}
                }
            }
        }

        join_all(to_stop.iter().map(|id| self.stop_locked(id))).await;

        let restarted: HashSet<&str> = report.restarted.iter().map(String::as_str).collect();
        for (id, camera) in desired {
            if self.spawn_locked(camera.clone()) && !restarted.contains(id) {
                report.started.push(id.to_string());
            }
        }

        report.started.sort();
        report.stopped.sort();
        report.restarted.sort();

        if !report.is_empty() {
            tracing::info!(
                started = ?report.started,
                stopped = ?report.stopped,
                restarted = ?report.restarted,
                "Camera workers reconciled"
            );
        }
        report
    }

    /// Cancel every worker and wait for all of them in parallel
    pub async fn stop_all(&self) {
        let _ops = self.ops.lock().await;

        let ids: Vec<String> = self.workers.lock().keys().cloned().collect();
        tracing::info!(count = ids.len(), "Stopping all camera workers");

        let outcomes = join_all(ids.iter().map(|id| self.stop_locked(id))).await;
        let forced = outcomes
            .iter()
            .filter(|o| **o == Some(StopOutcome::Forced))
            .count();

        tracing::info!(
            stopped = outcomes.len(),
            forced = forced,
            "All camera workers stopped"
        );
    }

    /// Ids with a live worker, sorted
    pub fn live_cameras(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Phase of every registered worker, sorted by camera id
    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        let workers = self.workers.lock();
        let mut statuses: Vec<WorkerStatus> = workers
            .iter()
            .map(|(id, managed)| WorkerStatus {
                camera_id: id.clone(),
                phase: *managed.phase.borrow(),
                alive: managed.is_alive(),
            })
            .collect();
        statuses.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        statuses
    }

    /// Spawn a worker unless one is registered for the id.
    /// Caller holds `ops`.
    fn spawn_locked(&self, camera: CameraConfig) -> bool {
        let mut workers = self.workers.lock();
        if workers.contains_key(&camera.camera_id) {
            return false;
        }

        let worker = CameraWorker::new(camera.clone(), self.deps.clone());
        let phase = worker.subscribe();
        let cancel = self.cancel.child_token();
        let task_handle = tokio::spawn(worker.run(cancel.clone()));

        workers.insert(
            camera.camera_id.clone(),
            ManagedWorker {
                camera,
                cancel,
                phase,
                task_handle,
            },
        );
        true
    }

    /// Cancel, wait up to the grace period, then drop from bookkeeping.
    /// Caller holds `ops`. `None` when no worker is registered.
    async fn stop_locked(&self, camera_id: &str) -> Option<StopOutcome> {
        let (cancel, phase) = {
            let workers = self.workers.lock();
            let managed = workers.get(camera_id)?;
            (managed.cancel.clone(), managed.phase.clone())
        };

        cancel.cancel();
        let stopped = tokio::time::timeout(self.grace, wait_stopped(phase))
            .await
            .is_ok();

        let managed = self.workers.lock().remove(camera_id);

        if stopped {
            tracing::info!(camera_id = %camera_id, "Camera worker stop acknowledged");
            Some(StopOutcome::Graceful)
        } else {
            tracing::error!(
                camera_id = %camera_id,
                grace_ms = self.grace.as_millis() as u64,
                "Camera worker did not stop within grace period, aborting and dropping it"
            );
            if let Some(managed) = managed {
                managed.task_handle.abort();
            }
            Some(StopOutcome::Forced)
        }
    }
}

impl Drop for WorkerManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Resolves once the worker publishes `Stopped` or its task is gone
async fn wait_stopped(mut phase: watch::Receiver<WorkerPhase>) {
    loop {
        let terminal = phase.borrow_and_update().is_terminal();
        if terminal || phase.changed().await.is_err() {
            return;
        }
    }
}

fn is_runnable(camera: &CameraConfig) -> bool {
    match camera.validate() {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(camera_id = %camera.camera_id, error = %e, "Skipping invalid camera");
            false
        }
    }
}

/// Periodically pull the camera set from `provider` and reconcile.
///
/// Provider failures keep the current workers running.
pub fn spawn_reconcile_loop(
    manager: Arc<WorkerManager>,
    provider: Arc<dyn CameraProvider>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match provider.list_cameras().await {
                Ok(cameras) => {
                    manager.reconcile(&cameras).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Camera list unavailable, keeping current workers");
                }
            }
        }

        tracing::info!("Reconcile loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_worker::test_support::*;
    use crate::config_store::StaticCameraProvider;
    use crate::snapshot_service::SnapshotFetcher;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn camera(id: &str) -> CameraConfig {
        CameraConfig::new(id, "http://10.0.0.5", 101)
    }

    fn harness() -> Harness {
        Harness::new(
            FakeFetcher::healthy(),
            FakeDetectorFactory::empty(),
            FakeSink::default(),
        )
    }

    /// Fetch that outlives any grace period
    struct StuckFetcher;

    #[async_trait]
    impl SnapshotFetcher for StuckFetcher {
        async fn fetch(&self, _camera: &CameraConfig) -> Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(Error::Connectivity("timeout".to_string()))
        }
    }

    /// Counts fetches that ran to completion
    #[derive(Default)]
    struct SlowFetcher {
        completed: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotFetcher for SlowFetcher {
        async fn fetch(&self, _camera: &CameraConfig) -> Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Err(Error::Connectivity("timeout".to_string()))
        }
    }

    fn stuck_manager(h: &Harness) -> WorkerManager {
        let mut deps = h.deps();
        deps.fetcher = Arc::new(StuckFetcher);
        WorkerManager::new(deps, DEFAULT_STOP_GRACE)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_all_is_idempotent() {
        let h = harness();
        let manager = WorkerManager::new(h.deps(), DEFAULT_STOP_GRACE);
        let mut disabled = camera("cam-3");
        disabled.enabled = false;
        let cameras = vec![camera("cam-1"), camera("cam-2"), disabled];

        assert_eq!(manager.start_all(&cameras).await, vec!["cam-1", "cam-2"]);
        assert!(manager.start_all(&cameras).await.is_empty());
        assert_eq!(manager.live_cameras(), vec!["cam-1", "cam-2"]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 2);
        manager.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_camera_is_skipped() {
        let h = harness();
        let manager = WorkerManager::new(h.deps(), DEFAULT_STOP_GRACE);
        let mut bad = camera("cam-1");
        bad.threshold = 1.5;

        assert!(manager.start_all(&[bad]).await.is_empty());
        assert!(manager.live_cameras().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_worker_graceful() {
        let h = harness();
        let manager = WorkerManager::new(h.deps(), DEFAULT_STOP_GRACE);
        manager.start_all(&[camera("cam-1")]).await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(
            manager.stop_worker("cam-1").await.unwrap(),
            StopOutcome::Graceful
        );
        assert!(manager.live_cameras().is_empty());
        assert!(matches!(
            manager.stop_worker("cam-1").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_worker_is_forced_out() {
        let h = harness();
        let manager = stuck_manager(&h);
        manager.start_all(&[camera("cam-1")]).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let started = Instant::now();
        assert_eq!(
            manager.stop_worker("cam-1").await.unwrap(),
            StopOutcome::Forced
        );
        assert!(started.elapsed() >= DEFAULT_STOP_GRACE);
        assert!(started.elapsed() < DEFAULT_STOP_GRACE * 2);
        assert!(manager.live_cameras().is_empty());

        // The id is free again
        assert_eq!(manager.start_all(&[camera("cam-1")]).await, vec!["cam-1"]);
        manager.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_stop_cuts_in_flight_fetch() {
        let h = harness();
        let fetcher = Arc::new(SlowFetcher::default());
        let mut deps = h.deps();
        deps.fetcher = fetcher.clone();
        let manager = WorkerManager::new(deps, DEFAULT_STOP_GRACE);
        manager.start_all(&[camera("cam-1")]).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            manager.stop_worker("cam-1").await.unwrap(),
            StopOutcome::Forced
        );
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(fetcher.completed.load(Ordering::SeqCst), 0);
        assert_eq!(h.metrics.snapshot("cam-1").fetch_errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_waits_in_parallel() {
        let h = harness();
        let manager = stuck_manager(&h);
        manager
            .start_all(&[camera("cam-1"), camera("cam-2"), camera("cam-3")])
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let started = Instant::now();
        manager.stop_all().await;

        assert!(started.elapsed() < DEFAULT_STOP_GRACE * 2);
        assert!(manager.live_cameras().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_applies_new_config() {
        let h = harness();
        let manager = WorkerManager::new(h.deps(), DEFAULT_STOP_GRACE);
        manager.start_all(&[camera("cam-1")]).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut updated = camera("cam-1");
        updated.debounce_sec = 30;
        manager.restart_worker("cam-1", updated).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(manager.live_cameras(), vec!["cam-1"]);
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 2);

        let mut disabled = camera("cam-1");
        disabled.enabled = false;
        manager.restart_worker("cam-1", disabled).await.unwrap();
        assert!(manager.live_cameras().is_empty());

        assert!(manager
            .restart_worker("cam-1", camera("cam-2"))
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_set_difference() {
        let h = harness();
        let manager = WorkerManager::new(h.deps(), DEFAULT_STOP_GRACE);

        let report = manager.reconcile(&[camera("a"), camera("b")]).await;
        assert_eq!(report.started, vec!["a", "b"]);

        let mut a_disabled = camera("a");
        a_disabled.enabled = false;
        let mut b_changed = camera("b");
        b_changed.polling_interval_sec = 10;
        let report = manager
            .reconcile(&[a_disabled, b_changed.clone(), camera("c")])
            .await;

        assert_eq!(report.stopped, vec!["a"]);
        assert_eq!(report.restarted, vec!["b"]);
        assert_eq!(report.started, vec!["c"]);
        assert_eq!(manager.live_cameras(), vec!["b", "c"]);

        let report = manager.reconcile(&[b_changed, camera("c")]).await;
        assert!(report.is_empty());
        manager.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_operations_never_duplicate_workers() {
        let h = harness();
        let manager = Arc::new(WorkerManager::new(h.deps(), DEFAULT_STOP_GRACE));
        let cameras = vec![camera("a"), camera("b")];

        let mut tasks = Vec::new();
        for i in 0..12 {
            let manager = manager.clone();
            let cameras = cameras.clone();
            tasks.push(tokio::spawn(async move {
                match i % 3 {
                    0 => {
                        manager.reconcile(&cameras).await;
                    }
                    1 => {
                        manager.start_all(&cameras).await;
                    }
                    _ => {
                        manager.reconcile(&cameras[..1]).await;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        manager.reconcile(&cameras).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let statuses = manager.worker_statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.alive));
        let live_tasks = statuses
            .iter()
            .filter(|s| s.phase != WorkerPhase::Stopped)
            .count();
        assert_eq!(live_tasks, 2);
        manager.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_statuses_report_phase() {
        let h = harness();
        let manager = WorkerManager::new(h.deps(), DEFAULT_STOP_GRACE);
        manager.start_all(&[camera("cam-1")]).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let statuses = manager.worker_statuses();
        assert_eq!(statuses[0].camera_id, "cam-1");
        assert_eq!(statuses[0].phase, WorkerPhase::Polling);
        assert!(statuses[0].alive);
        manager.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_loop_follows_provider() {
        let h = harness();
        let manager = Arc::new(WorkerManager::new(h.deps(), DEFAULT_STOP_GRACE));
        let provider = Arc::new(StaticCameraProvider::new(vec![camera("a")]));
        let cancel = CancellationToken::new();

        let handle = spawn_reconcile_loop(
            manager.clone(),
            provider.clone(),
            Duration::from_secs(10),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.live_cameras(), vec!["a"]);

        provider.set(vec![camera("b")]).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(manager.live_cameras(), vec!["b"]);

        cancel.cancel();
        handle.await.unwrap();
        manager.stop_all().await;
    }
}

//! PPE Camserver Library
//!
//! Per-camera PPE compliance monitoring
//!
//! ## Architecture (10 Components)
//!
//! 1. ConfigStore - Camera inventory and monitoring policy
//! 2. SnapshotService - Still image capture from cameras
//! 3. Detection - Object detection contract and remote adapter
//! 4. RuleEngine - Subject / equipment IoU matching
//! 5. EventGate - Debounce and dedupe of violation events
//! 6. Metrics - Per-camera telemetry
//! 7. EventSink - Image store, in-memory log, MySQL events
//! 8. RealtimeHub - Live event distribution
//! 9. CameraWorker - One camera's poll loop with backoff
//! 10. WorkerManager - Worker lifecycle and reconciliation
//!
//! ## Design Principles
//!
//! - One task per camera, no shared mutable state between workers
//! - Collaborators (fetcher, detector, sink, metrics) are injected traits
//! - A failing camera never affects another camera

pub mod camera_worker;
pub mod config_store;
pub mod detection;
pub mod error;
pub mod event_gate;
pub mod event_sink;
pub mod metrics;
pub mod realtime_hub;
pub mod rule_engine;
pub mod snapshot_service;
pub mod state;
pub mod worker_manager;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};

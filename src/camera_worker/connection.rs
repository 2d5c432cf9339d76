//! Camera connection status (lost / recovered transitions)

use crate::metrics::MetricsSink;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Unknown,
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Lost,
    Recovered,
}

/// Tracks one camera's reachability across fetches
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    status: ConnectionStatus,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Unknown,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Apply a fetch outcome.
    ///
    /// While offline every fetch counts as a reconnect attempt.
    pub fn update(
        &mut self,
        camera_id: &str,
        is_online: bool,
        metrics: &dyn MetricsSink,
    ) -> Option<ConnectionEvent> {
        let prev = self.status;
        self.status = if is_online {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        };

        match (prev, self.status) {
            (ConnectionStatus::Online, ConnectionStatus::Offline) => {
                tracing::warn!(camera_id = %camera_id, "Camera connection lost");
                Some(ConnectionEvent::Lost)
            }
            (ConnectionStatus::Unknown, ConnectionStatus::Offline) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    "Camera initial poll failed - marking as lost"
                );
                Some(ConnectionEvent::Lost)
            }
            (ConnectionStatus::Offline, ConnectionStatus::Online) => {
                metrics.record_reconnect(camera_id, true);
                tracing::info!(camera_id = %camera_id, "Camera connection recovered");
                Some(ConnectionEvent::Recovered)
            }
            (ConnectionStatus::Offline, ConnectionStatus::Offline) => {
                metrics.record_reconnect(camera_id, false);
                None
            }
            _ => None,
        }
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemoryMetrics;

    #[test]
    fn test_transitions() {
        let metrics = InMemoryMetrics::new();
        let mut tracker = ConnectionTracker::new();

        assert_eq!(tracker.update("cam", true, &metrics), None);
        assert_eq!(
            tracker.update("cam", false, &metrics),
            Some(ConnectionEvent::Lost)
        );
        assert_eq!(tracker.update("cam", false, &metrics), None);
        assert_eq!(tracker.update("cam", false, &metrics), None);
        assert_eq!(
            tracker.update("cam", true, &metrics),
            Some(ConnectionEvent::Recovered)
        );

        let counters = metrics.snapshot("cam");
        assert_eq!(counters.reconnect_fail, 2);
        assert_eq!(counters.reconnect_success, 1);
        assert_eq!(tracker.status(), ConnectionStatus::Online);
    }

    #[test]
    fn test_initial_failure_is_lost() {
        let metrics = InMemoryMetrics::new();
        let mut tracker = ConnectionTracker::new();
        assert_eq!(
            tracker.update("cam", false, &metrics),
            Some(ConnectionEvent::Lost)
        );
        assert_eq!(metrics.snapshot("cam").reconnect_fail, 0);
    }
}

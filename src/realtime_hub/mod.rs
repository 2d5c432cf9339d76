//! RealtimeHub - Live Event Distribution
//!
//! ## Responsibilities
//!
//! - Client channel registration (one unbounded channel per client)
//! - Broadcasting accepted violation events as `event_log` messages
//!
//! Messages carry image paths only; clients fetch the image separately.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    EventLog(EventLogMessage),
}

impl HubMessage {
    fn type_name(&self) -> &'static str {
        match self {
            HubMessage::EventLog(_) => "event_log",
        }
    }
}

/// Event log message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventLogMessage {
    pub event_id: u64,
    pub camera_id: String,
    /// e.g. `no_helmet_no_mask`
    pub event_type: String,
    pub timestamp: String,
    pub image_path: String,
    pub thumb_path: Option<String>,
}

/// Client connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, ClientConnection { id, tx });
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Client connected");

        (id, rx)
    }

    /// Unregister a client
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Client disconnected");
        }
    }

    /// Broadcast message to all clients.
    ///
    /// Clients whose receiver has been dropped are pruned.
    pub async fn broadcast(&self, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };

        let mut closed = Vec::new();
        {
            let connections = self.connections.read().await;
            tracing::debug!(
                message_type = message.type_name(),
                client_count = connections.len(),
                "Broadcasting message to clients"
            );

            for conn in connections.values() {
                if conn.tx.send(json.clone()).is_err() {
                    closed.push(conn.id);
                }
            }
        }

        for id in closed {
            tracing::debug!(connection_id = %id, "Dropping closed client channel");
            self.unregister(&id).await;
        }
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

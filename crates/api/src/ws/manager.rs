use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use iotsim_core::types::{DbId, Timestamp};
use iotsim_events::{LogHistory, SimulationEvent};
use tokio::sync::{mpsc, RwLock};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// What a connection wants to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// Every project's logs plus global status pushes.
    Global,
    /// One project's logs and status only.
    Project(DbId),
}

impl Subscription {
    fn wants_project(&self, project_id: DbId) -> bool {
        match self {
            Self::Global => true,
            Self::Project(id) => *id == project_id,
        }
    }
}

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    pub subscription: Subscription,
    /// Channel sender for outbound messages to this connection.
    pub sender: WsSender,
    pub connected_at: Timestamp,
}

/// Manages all active WebSocket connections.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application. A connection whose channel is closed is
/// dropped the next time a message fails to reach it.
pub struct WsManager {
    connections: RwLock<HashMap<String, WsConnection>>,
}

impl WsManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink.
    pub async fn add(
        &self,
        conn_id: String,
        subscription: Subscription,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = WsConnection {
            subscription,
            sender: tx,
            connected_at: chrono::Utc::now(),
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    /// Register a connection, then snapshot the history it should replay.
    ///
    /// Registering first means an event published while the snapshot is
    /// taken reaches the connection live instead of being missed. Global
    /// subscriptions get no backlog.
    pub async fn add_with_backlog(
        &self,
        conn_id: String,
        subscription: Subscription,
        history: &LogHistory,
    ) -> (mpsc::UnboundedReceiver<Message>, Vec<SimulationEvent>) {
        let rx = self.add(conn_id, subscription).await;
        let backlog = match subscription {
            Subscription::Project(project_id) => history.project(project_id, None),
            Subscription::Global => Vec::new(),
        };
        (rx, backlog)
    }

    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Send to every connection interested in `project_id`, including
    /// global subscribers. Returns the number of recipients.
    pub async fn send_to_project(&self, project_id: DbId, message: Message) -> usize {
        self.dispatch(|s| s.wants_project(project_id), message).await
    }

    /// Send only to connections subscribed to one specific project.
    pub async fn send_to_project_only(&self, project_id: DbId, message: Message) -> usize {
        self.dispatch(|s| *s == Subscription::Project(project_id), message)
            .await
    }

    /// Send to global subscribers only.
    pub async fn send_global(&self, message: Message) -> usize {
        self.dispatch(|s| *s == Subscription::Global, message).await
    }

    /// Send to every connection.
    pub async fn broadcast(&self, message: Message) -> usize {
        self.dispatch(|_| true, message).await
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Connections watching a specific project (global ones excluded).
    pub async fn project_subscribers(&self, project_id: DbId) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.subscription == Subscription::Project(project_id))
            .count()
    }

    /// Send a Close frame to every connection, then clear the map.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every connected client.
    pub async fn ping_all(&self) -> usize {
        self.broadcast(Message::Ping(Bytes::new())).await
    }

    async fn dispatch(&self, wants: impl Fn(&Subscription) -> bool, message: Message) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let conns = self.connections.read().await;
            for (id, conn) in conns.iter().filter(|(_, c)| wants(&c.subscription)) {
                if conn.sender.send(message.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(id.clone());
                }
            }
        }

        if !dead.is_empty() {
            let mut conns = self.connections.write().await;
            for id in &dead {
                conns.remove(id);
            }
            tracing::debug!(dropped = dead.len(), "Dropped closed WebSocket connections");
        }
        delivered
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}

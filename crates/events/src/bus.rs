//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the central publish/subscribe hub for
//! [`SimulationEvent`]s. It is shared via `Arc<EventBus>` between the
//! engine and the API layer.

use chrono::{DateTime, Utc};
use iotsim_core::types::DbId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// SimulationEvent
// ---------------------------------------------------------------------------

/// Kind of a Device Runner event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationEventType {
    MessageSent,
    Error,
    Warning,
    Started,
    Stopped,
    Connected,
    Disconnected,
}

impl SimulationEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageSent => "message_sent",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    /// Whether the event marks a change in a runner's lifecycle.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Started | Self::Stopped | Self::Connected | Self::Disconnected
        )
    }
}

/// One log entry emitted by a Device Runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationEvent {
    pub project_id: DbId,
    pub device_id: DbId,
    pub device_name: String,
    pub event_type: SimulationEventType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// The payload that was sent, present on `message_sent` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl SimulationEvent {
    pub fn new(
        project_id: DbId,
        device_id: DbId,
        device_name: impl Into<String>,
        event_type: SimulationEventType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            device_id,
            device_name: device_name.into(),
            event_type,
            message: message.into(),
            timestamp: Utc::now(),
            payload: None,
        }
    }

    /// Attach the sent payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 4096;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`SimulationEvent`]. Events from
/// one runner arrive in publish order; events from different runners may
/// interleave arbitrarily.
pub struct EventBus {
    sender: broadcast::Sender<SimulationEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: SimulationEvent) {
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<SimulationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

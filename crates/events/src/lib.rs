//! Simulation event bus and log history.
//!
//! - [`EventBus`] is the in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`. Device Runners publish, WebSocket
//!   broadcasters and the log recorder subscribe.
//! - [`SimulationEvent`] is the canonical log entry envelope.
//! - [`LogHistory`] keeps a bounded per-project backlog for replay to late
//!   subscribers and for `GET /simulation/logs`.
//! - [`LogRecorder`] is the background service that fills the history.

pub mod bus;
pub mod history;
pub mod recorder;

pub use bus::{EventBus, SimulationEvent, SimulationEventType};
pub use history::LogHistory;
pub use recorder::LogRecorder;

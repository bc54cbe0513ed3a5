//! WebSocket fan-out of simulation events and status.
//!
//! Browser clients connect to `/ws/simulation` for everything, or to
//! `/simulation/{project_id}/logs` for a single project. Background tasks
//! forward bus events and periodic status snapshots through [`WsManager`].

mod broadcaster;
mod handler;
mod heartbeat;
pub mod manager;
pub mod message;

pub use broadcaster::{EventForwarder, StatusPublisher};
pub use handler::{global_ws_handler, project_logs_ws_handler};
pub use heartbeat::start_heartbeat;
pub use manager::{Subscription, WsManager};
pub use message::WsEvent;

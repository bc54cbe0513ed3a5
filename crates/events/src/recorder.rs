//! Background service that copies bus events into the [`LogHistory`].

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::bus::SimulationEvent;
use crate::history::LogHistory;

/// Records every published event into a [`LogHistory`].
pub struct LogRecorder;

impl LogRecorder {
    /// Run the recording loop.
    ///
    /// Exits when the channel is closed (the [`EventBus`](crate::bus::EventBus)
    /// is dropped).
    pub async fn run(history: Arc<LogHistory>, mut receiver: broadcast::Receiver<SimulationEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => history.record(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Log recorder lagged, some entries were not kept");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, log recorder shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventBus, SimulationEventType};

    #[tokio::test]
    async fn records_until_bus_dropped() {
        let bus = EventBus::new(16);
        let history = Arc::new(LogHistory::new(10));
        let handle = tokio::spawn(LogRecorder::run(Arc::clone(&history), bus.subscribe()));

        bus.publish(SimulationEvent::new(4, 1, "d", SimulationEventType::Started, "up"));
        bus.publish(SimulationEvent::new(4, 1, "d", SimulationEventType::Stopped, "down"));
        drop(bus);

        handle.await.unwrap();
        let entries = history.project(4, None);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].event_type, SimulationEventType::Stopped);
    }
}

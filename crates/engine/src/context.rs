//! Shared dependencies handed to every Supervisor and Runner.

use std::sync::Arc;

use iotsim_connectors::ConnectorFactory;
use iotsim_core::payload::PythonSandbox;
use iotsim_events::EventBus;

use crate::config::EngineConfig;

/// Cheap-to-clone bundle of engine dependencies.
#[derive(Clone)]
pub struct EngineContext {
    pub bus: Arc<EventBus>,
    pub factory: Arc<dyn ConnectorFactory>,
    pub sandbox: Arc<PythonSandbox>,
    pub config: Arc<EngineConfig>,
}

impl EngineContext {
    pub fn new(
        bus: Arc<EventBus>,
        factory: Arc<dyn ConnectorFactory>,
        sandbox: Arc<PythonSandbox>,
        config: EngineConfig,
    ) -> Self {
        Self {
            bus,
            factory,
            sandbox,
            config: Arc::new(config),
        }
    }
}

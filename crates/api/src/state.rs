use std::sync::Arc;

use iotsim_connectors::ConnectorFactory;
use iotsim_core::payload::PythonSandbox;
use iotsim_engine::SimulationRegistry;
use iotsim_events::{EventBus, LogHistory};

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: iotsim_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// WebSocket connection manager (browser clients).
    pub ws_manager: Arc<WsManager>,
    /// Running project simulations.
    pub registry: Arc<SimulationRegistry>,
    /// Event bus carrying Device Runner events.
    pub event_bus: Arc<EventBus>,
    /// Recent events per project, for replay and `GET /simulation/logs`.
    pub log_history: Arc<LogHistory>,
    /// Sandbox for Python payload previews and validation.
    pub sandbox: Arc<PythonSandbox>,
    /// Builds connectors for device tests and connection probes.
    pub connectors: Arc<dyn ConnectorFactory>,
}

impl AppState {
    /// Assemble state around a registry, sharing its bus, sandbox and
    /// connector factory.
    pub fn new(
        pool: iotsim_db::DbPool,
        config: ServerConfig,
        registry: Arc<SimulationRegistry>,
        log_history: Arc<LogHistory>,
    ) -> Self {
        let ctx = registry.context().clone();
        Self {
            pool,
            config: Arc::new(config),
            ws_manager: Arc::new(WsManager::new()),
            event_bus: ctx.bus,
            sandbox: ctx.sandbox,
            connectors: ctx.factory,
            registry,
            log_history,
        }
    }
}

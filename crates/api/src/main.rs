use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use iotsim_connectors::DefaultConnectorFactory;
use iotsim_core::payload::{PythonSandbox, SandboxConfig};
use iotsim_engine::{EngineConfig, EngineContext, SimulationRegistry};
use iotsim_events::{EventBus, LogHistory, LogRecorder};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iotsim_api::config::ServerConfig;
use iotsim_api::router::build_app_router;
use iotsim_api::state::AppState;
use iotsim_api::ws;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "iotsim_api=debug,iotsim_engine=debug,iotsim_connectors=info,tower_http=debug".into()
    });
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let engine_config = EngineConfig::from_env();
    let sandbox_config = SandboxConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        max_consecutive_errors = engine_config.max_consecutive_errors,
        log_history = engine_config.log_history,
        python = %sandbox_config.python_bin,
        "Loaded engine configuration"
    );

    // --- Database ---
    let pool = iotsim_db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    iotsim_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    iotsim_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Event bus and log history ---
    let event_bus = Arc::new(EventBus::default());
    let log_history = Arc::new(LogHistory::new(engine_config.log_history));
    let recorder_handle = tokio::spawn(LogRecorder::run(
        Arc::clone(&log_history),
        event_bus.subscribe(),
    ));

    // --- Simulation registry ---
    let ctx = EngineContext::new(
        Arc::clone(&event_bus),
        Arc::new(DefaultConnectorFactory),
        Arc::new(PythonSandbox::new(sandbox_config)),
        engine_config,
    );
    let registry = Arc::new(SimulationRegistry::new(ctx));
    tracing::info!("Simulation registry created");

    // --- App state ---
    let state = AppState::new(pool, config.clone(), Arc::clone(&registry), log_history);
    let ws_manager = Arc::clone(&state.ws_manager);

    // --- WebSocket services ---
    let services_cancel = CancellationToken::new();
    let forwarder_handle = tokio::spawn(ws::EventForwarder::run(
        Arc::clone(&ws_manager),
        Arc::clone(&registry),
        event_bus.subscribe(),
        services_cancel.clone(),
    ));
    let publisher_handle = tokio::spawn(ws::StatusPublisher::run(
        Arc::clone(&ws_manager),
        Arc::clone(&registry),
        Duration::from_secs(config.status_broadcast_interval_secs),
        services_cancel.clone(),
    ));
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager), services_cancel.clone());
    tracing::info!("WebSocket services started (forwarder, status publisher, heartbeat)");

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Simulations stop before the forwarder so their final events go out.
    let cleanup_limit = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(cleanup_limit, registry.shutdown())
        .await
        .is_err()
    {
        tracing::error!(
            timeout_secs = config.shutdown_timeout_secs,
            "Simulation shutdown did not finish in time"
        );
    }

    services_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), forwarder_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), publisher_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), heartbeat_handle).await;
    tracing::info!("WebSocket services stopped");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    // History is in-memory only.
    recorder_handle.abort();

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Upper bound for post-shutdown cleanup in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// SQLite connection string.
    pub database_url: String,
    /// Period of the WebSocket status publisher in seconds (default: `2`).
    pub status_broadcast_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                        |
    /// |----------------------------------|--------------------------------|
    /// | `HOST`                           | `0.0.0.0`                      |
    /// | `PORT`                           | `8000`                         |
    /// | `CORS_ORIGINS` (`*` for any)     | `http://localhost:5173`        |
    /// | `REQUEST_TIMEOUT_SECS`           | `30`                           |
    /// | `SHUTDOWN_TIMEOUT_SECS`          | `30`                           |
    /// | `DATABASE_URL`                   | `sqlite://iotsim.db?mode=rwc`  |
    /// | `STATUS_BROADCAST_INTERVAL_SECS` | `2`                            |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://iotsim.db?mode=rwc".into());

        let status_broadcast_interval_secs: u64 = std::env::var("STATUS_BROADCAST_INTERVAL_SECS")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .expect("STATUS_BROADCAST_INTERVAL_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            database_url,
            status_broadcast_interval_secs,
        }
    }
}

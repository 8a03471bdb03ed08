use std::path::PathBuf;

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields except `SECRET_KEY` have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Root for the on-disk layout: catalog database and script trees.
    pub data_path: PathBuf,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// JWT token configuration (secret, expiry).
    pub jwt: JwtConfig,

    /// Admin account seeded when the users table is empty.
    pub admin_username: String,
    /// Seed password; when unset a random one is generated and logged once.
    pub admin_password: Option<String>,
    pub admin_email: String,

    /// Fallback run timeout when neither the script nor the settings
    /// table provides one.
    pub default_timeout_secs: i64,
    /// Best-effort memory cap default, in MB.
    pub default_memory_limit_mb: i64,
    /// Capture cap per output stream, in bytes.
    pub output_cap_bytes: usize,

    /// Bounded run queue capacity.
    pub run_queue_capacity: usize,
    /// Fixed worker pool size; equals the max concurrent runs.
    pub worker_count: usize,

    /// API key seeded into settings on first boot.
    pub default_api_key: String,
}

/// Default capture cap: 512 KiB per stream.
const DEFAULT_OUTPUT_CAP: usize = 512 * 1024;

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                   |
    /// |----------------------------------|---------------------------|
    /// | `HOST`                           | `0.0.0.0`                 |
    /// | `PORT`                           | `8000`                    |
    /// | `TEMPO_DATA_PATH`                | `./data`                  |
    /// | `CORS_ORIGINS`                   | `http://localhost:5173`   |
    /// | `REQUEST_TIMEOUT_SECS`           | `30`                      |
    /// | `SECRET_KEY`                     | **required**              |
    /// | `ADMIN_USERNAME`                 | `admin`                   |
    /// | `ADMIN_PASSWORD`                 | generated when unset      |
    /// | `ADMIN_EMAIL`                    | `admin@localhost`         |
    /// | `DEFAULT_SCRIPT_TIMEOUT_SECONDS` | `300`                     |
    /// | `DEFAULT_MEMORY_LIMIT_MB`        | `512`                     |
    /// | `OUTPUT_CAP_BYTES`               | `524288`                  |
    /// | `RUN_QUEUE_CAPACITY`             | `64`                      |
    /// | `WORKER_COUNT`                   | `4`                       |
    /// | `DEFAULT_API_KEY`                | `default-api-key-change-me` |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let data_path = PathBuf::from(
            std::env::var("TEMPO_DATA_PATH").unwrap_or_else(|_| "./data".into()),
        );

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

        Self {
            host,
            port,
            data_path,
            cors_origins,
            request_timeout_secs,
            jwt: JwtConfig::from_env(),
            admin_username: std::env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".into()),
            admin_password: std::env::var("ADMIN_PASSWORD").ok().filter(|p| !p.is_empty()),
            admin_email: std::env::var("ADMIN_EMAIL")
                .unwrap_or_else(|_| "admin@localhost".into()),
            default_timeout_secs: env_i64("DEFAULT_SCRIPT_TIMEOUT_SECONDS", 300),
            default_memory_limit_mb: env_i64("DEFAULT_MEMORY_LIMIT_MB", 512),
            output_cap_bytes: env_i64("OUTPUT_CAP_BYTES", DEFAULT_OUTPUT_CAP as i64) as usize,
            run_queue_capacity: env_i64("RUN_QUEUE_CAPACITY", 64) as usize,
            worker_count: env_i64("WORKER_COUNT", 4) as usize,
            default_api_key: std::env::var("DEFAULT_API_KEY")
                .unwrap_or_else(|_| "default-api-key-change-me".into()),
        }
    }

    /// Path of the catalog database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_path.join("tempo.db")
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

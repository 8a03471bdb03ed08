//! Settings table model and well-known keys.

use serde::Serialize;
use sqlx::FromRow;

/// One key/value row in the settings table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub description: String,
}

/// API key accepted by the URL trigger endpoint.
pub const KEY_API_KEY: &str = "api_key";

/// Toggles the external rate-limit middleware.
pub const KEY_RATE_LIMIT_ENABLED: &str = "rate_limit_enabled";

/// Default wall-clock timeout (seconds) when a script has no override.
pub const KEY_DEFAULT_SCRIPT_TIMEOUT: &str = "default_script_timeout";

/// Default memory cap (MB); best-effort enforcement.
pub const KEY_DEFAULT_MEMORY_LIMIT: &str = "default_memory_limit";

/// Newest execution records kept per script by the retention task.
pub const KEY_MAX_EXECUTION_LOGS: &str = "max_execution_logs";

/// Age in days past which execution records are pruned.
pub const KEY_LOG_RETENTION_DAYS: &str = "log_retention_days";

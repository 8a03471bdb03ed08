//! Repository for the `settings` key/value table.

use crate::models::setting::{
    Setting, KEY_API_KEY, KEY_DEFAULT_MEMORY_LIMIT, KEY_DEFAULT_SCRIPT_TIMEOUT,
    KEY_LOG_RETENTION_DAYS, KEY_MAX_EXECUTION_LOGS, KEY_RATE_LIMIT_ENABLED,
};
use crate::DbPool;

/// Provides typed access to application settings.
pub struct SettingsRepo;

impl SettingsRepo {
    /// Seed default settings on first boot. Existing keys are left
    /// untouched, so operator edits survive restarts.
    pub async fn seed_defaults(pool: &DbPool, default_api_key: &str) -> Result<(), sqlx::Error> {
        let defaults: &[(&str, String, &str)] = &[
            (
                KEY_API_KEY,
                default_api_key.to_string(),
                "API key for URL triggers",
            ),
            (
                KEY_RATE_LIMIT_ENABLED,
                "true".to_string(),
                "Enable rate limiting",
            ),
            (
                KEY_DEFAULT_SCRIPT_TIMEOUT,
                "300".to_string(),
                "Default script timeout in seconds",
            ),
            (
                KEY_DEFAULT_MEMORY_LIMIT,
                "512".to_string(),
                "Default memory limit in MB",
            ),
            (
                KEY_MAX_EXECUTION_LOGS,
                "1000".to_string(),
                "Maximum execution logs to keep per script",
            ),
            (
                KEY_LOG_RETENTION_DAYS,
                "30".to_string(),
                "Days to keep execution logs",
            ),
        ];

        for (key, value, description) in defaults {
            sqlx::query(
                "INSERT OR IGNORE INTO settings (key, value, description) VALUES (?, ?, ?)",
            )
            .bind(key)
            .bind(value)
            .bind(description)
            .execute(pool)
            .await?;
        }

        Ok(())
    }

    pub async fn get(pool: &DbPool, key: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await
    }

    /// Numeric setting with a fallback for missing or unparseable rows.
    pub async fn get_i64_or(pool: &DbPool, key: &str, default: i64) -> Result<i64, sqlx::Error> {
        Ok(Self::get(pool, key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }

    pub async fn set(pool: &DbPool, key: &str, value: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_all(pool: &DbPool) -> Result<Vec<Setting>, sqlx::Error> {
        sqlx::query_as::<_, Setting>(
            "SELECT key, value, description FROM settings ORDER BY key",
        )
        .fetch_all(pool)
        .await
    }
}

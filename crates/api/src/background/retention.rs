//! Periodic pruning of old execution records.
//!
//! Keeps the newest `max_execution_logs` records per script and deletes
//! anything older than `log_retention_days`. Both limits come from the
//! settings table so the operator can tune them without a restart.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use tempo_db::models::setting::{KEY_LOG_RETENTION_DAYS, KEY_MAX_EXECUTION_LOGS};
use tempo_db::repositories::{ExecutionRepo, SettingsRepo};
use tempo_db::DbPool;

/// How often the cleanup job runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600); // 1 hour

/// Fallbacks when the settings rows are missing.
const DEFAULT_MAX_LOGS: i64 = 1000;
const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Run the retention loop until `cancel` is triggered.
pub async fn run(pool: DbPool, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = CLEANUP_INTERVAL.as_secs(),
        "Log retention job started"
    );

    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Log retention job stopping");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = prune(&pool).await {
                    tracing::error!(error = %e, "Log retention: cleanup failed");
                }
            }
        }
    }
}

/// One pruning pass: per-script cap first, then the age cutoff.
async fn prune(pool: &DbPool) -> Result<(), sqlx::Error> {
    let max_logs =
        SettingsRepo::get_i64_or(pool, KEY_MAX_EXECUTION_LOGS, DEFAULT_MAX_LOGS).await?;
    let retention_days =
        SettingsRepo::get_i64_or(pool, KEY_LOG_RETENTION_DAYS, DEFAULT_RETENTION_DAYS).await?;

    let capped = ExecutionRepo::retain_newest_per_script(pool, max_logs.max(1)).await?;
    let cutoff = Utc::now() - chrono::Duration::days(retention_days.max(1));
    let aged = ExecutionRepo::delete_older_than(pool, cutoff).await?;

    if capped > 0 || aged > 0 {
        tracing::info!(capped, aged, "Log retention: purged old execution records");
    } else {
        tracing::debug!("Log retention: nothing to purge");
    }
    Ok(())
}

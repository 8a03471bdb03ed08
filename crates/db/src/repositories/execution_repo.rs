//! Repository for the `execution_logs` table.
//!
//! Enforces the two store-level run invariants: at most one `running`
//! record per script (guarded insert in [`ExecutionRepo::try_start`]),
//! and write-once terminal status (every finalize statement carries
//! `AND status = 'running'`).

use chrono::Utc;
use tempo_core::scripting::status::{ABANDONED_MARKER, STATUS_FAILED, STATUS_RUNNING};
use tempo_core::types::{DbId, Timestamp};

use crate::models::execution::{ExecutionFilter, ExecutionRecord, ExecutionStats, FinalizeExecution};
use crate::DbPool;

/// Column list for `execution_logs` queries, including the joined
/// script name.
const COLUMNS: &str = "\
    el.id, el.script_id, s.name AS script_name, el.trigger_id, \
    el.started_at, el.finished_at, el.duration_ms, \
    el.status, el.exit_code, el.stdout, el.stderr, \
    el.stdout_truncated, el.stderr_truncated, \
    el.max_memory_mb, el.max_cpu_percent, el.triggered_by";

/// Join clause shared by all read queries.
const JOIN: &str = "execution_logs el JOIN scripts s ON el.script_id = s.id";

/// Default and maximum page sizes for listings.
const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

/// Provides lifecycle and query operations for execution records.
pub struct ExecutionRepo;

impl ExecutionRepo {
    /// Atomically claim the script's run slot.
    ///
    /// Inserts a `running` record only if no other `running` record
    /// exists for the script, and returns the new record id. `None`
    /// means another run is active and this request must be rejected
    /// with `already_running`.
    pub async fn try_start(
        pool: &DbPool,
        script_id: DbId,
        trigger_id: Option<DbId>,
        triggered_by: &str,
        started_at: Timestamp,
    ) -> Result<Option<DbId>, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO execution_logs (script_id, trigger_id, started_at, status, triggered_by) \
             SELECT ?, ?, ?, ?, ? \
             WHERE NOT EXISTS (\
                 SELECT 1 FROM execution_logs WHERE script_id = ? AND status = ?)",
        )
        .bind(script_id)
        .bind(trigger_id)
        .bind(started_at)
        .bind(STATUS_RUNNING)
        .bind(triggered_by)
        .bind(script_id)
        .bind(STATUS_RUNNING)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(None)
        } else {
            Ok(Some(result.last_insert_rowid()))
        }
    }

    /// Finalize a running record. Write-once: a record that already
    /// reached a terminal status is never touched again. Returns
    /// whether the transition happened.
    pub async fn finalize(
        pool: &DbPool,
        id: DbId,
        outcome: &FinalizeExecution,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE execution_logs SET \
                 status = ?, exit_code = ?, stdout = ?, stderr = ?, \
                 stdout_truncated = ?, stderr_truncated = ?, \
                 finished_at = ?, duration_ms = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(outcome.status)
        .bind(outcome.exit_code)
        .bind(&outcome.stdout)
        .bind(&outcome.stderr)
        .bind(outcome.stdout_truncated)
        .bind(outcome.stderr_truncated)
        .bind(outcome.finished_at)
        .bind(outcome.duration_ms)
        .bind(id)
        .bind(STATUS_RUNNING)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(
        pool: &DbPool,
        id: DbId,
    ) -> Result<Option<ExecutionRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM {JOIN} WHERE el.id = ?");
        sqlx::query_as::<_, ExecutionRecord>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// The script's active run, when one exists.
    pub async fn find_running_for_script(
        pool: &DbPool,
        script_id: DbId,
    ) -> Result<Option<ExecutionRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM {JOIN} \
             WHERE el.script_id = ? AND el.status = ?"
        );
        sqlx::query_as::<_, ExecutionRecord>(&query)
            .bind(script_id)
            .bind(STATUS_RUNNING)
            .fetch_optional(pool)
            .await
    }

    /// All currently running records (for the status endpoint).
    pub async fn list_running(pool: &DbPool) -> Result<Vec<ExecutionRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM {JOIN} \
             WHERE el.status = ? \
             ORDER BY el.started_at DESC"
        );
        sqlx::query_as::<_, ExecutionRecord>(&query)
            .bind(STATUS_RUNNING)
            .fetch_all(pool)
            .await
    }

    /// Paginated listing with the full filter set.
    pub async fn list(
        pool: &DbPool,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionRecord>, sqlx::Error> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = filter.offset.unwrap_or(0).max(0);
        let search = filter.search.as_ref().map(|s| format!("%{s}%"));

        let query = format!(
            "SELECT {COLUMNS} FROM {JOIN} \
             WHERE (? IS NULL OR el.script_id = ?) \
               AND (? IS NULL OR el.status = ?) \
               AND (? IS NULL OR el.started_at >= ?) \
               AND (? IS NULL OR el.started_at <= ?) \
               AND (? IS NULL OR el.stdout LIKE ? OR el.stderr LIKE ?) \
             ORDER BY el.started_at DESC \
             LIMIT ? OFFSET ?"
        );

        sqlx::query_as::<_, ExecutionRecord>(&query)
            .bind(filter.script_id)
            .bind(filter.script_id)
            .bind(&filter.status)
            .bind(&filter.status)
            .bind(filter.date_from)
            .bind(filter.date_from)
            .bind(filter.date_to)
            .bind(filter.date_to)
            .bind(&search)
            .bind(&search)
            .bind(&search)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Aggregate statistics over the last `days` days, optionally for
    /// one script.
    pub async fn stats(
        pool: &DbPool,
        script_id: Option<DbId>,
        since: Timestamp,
    ) -> Result<ExecutionStats, sqlx::Error> {
        sqlx::query_as::<_, ExecutionStats>(
            "SELECT \
                 COUNT(*) AS total_executions, \
                 COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0) AS successful_executions, \
                 COALESCE(SUM(CASE WHEN status IN ('failed', 'timeout') THEN 1 ELSE 0 END), 0) AS failed_executions, \
                 AVG(duration_ms) AS avg_duration_ms, \
                 MIN(started_at) AS first_execution, \
                 MAX(started_at) AS last_execution \
             FROM execution_logs \
             WHERE started_at >= ? AND (? IS NULL OR script_id = ?)",
        )
        .bind(since)
        .bind(script_id)
        .bind(script_id)
        .fetch_one(pool)
        .await
    }

    pub async fn delete(pool: &DbPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM execution_logs WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every record for one script; returns the count removed.
    pub async fn delete_for_script(pool: &DbPool, script_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM execution_logs WHERE script_id = ?")
            .bind(script_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Retention: delete records older than `cutoff`.
    pub async fn delete_older_than(pool: &DbPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM execution_logs WHERE started_at < ?")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Retention: keep only the newest `keep` records per script.
    pub async fn retain_newest_per_script(pool: &DbPool, keep: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM execution_logs WHERE id NOT IN (\
                 SELECT id FROM (\
                     SELECT id, ROW_NUMBER() OVER (\
                         PARTITION BY script_id ORDER BY started_at DESC) AS rn \
                     FROM execution_logs) ranked \
                 WHERE rn <= ?)",
        )
        .bind(keep)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Boot-time reconciliation: rewrite `running` records older than
    /// `cutoff` to `failed` with the abandonment marker. Returns how
    /// many orphans were reconciled.
    pub async fn reap_abandoned(pool: &DbPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE execution_logs SET \
                 status = ?, \
                 stderr = ?, \
                 finished_at = ?, \
                 duration_ms = CAST((julianday(?) - julianday(started_at)) * 86400000 AS INTEGER) \
             WHERE status = ? AND started_at < ?",
        )
        .bind(STATUS_FAILED)
        .bind(ABANDONED_MARKER)
        .bind(now)
        .bind(now)
        .bind(STATUS_RUNNING)
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

//! Execution record model, list filters, and summary statistics.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tempo_core::types::{DbId, Timestamp};

/// One durable run record. Write-once after reaching a terminal status.
///
/// Includes the joined `script_name` for listing endpoints.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExecutionRecord {
    pub id: DbId,
    pub script_id: DbId,
    /// Joined from `scripts.name`.
    pub script_name: String,
    pub trigger_id: Option<DbId>,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    pub status: String,
    pub exit_code: Option<i64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub max_memory_mb: Option<i64>,
    pub max_cpu_percent: Option<f64>,
    pub triggered_by: String,
}

/// Everything written when a run reaches a terminal status.
#[derive(Debug, Clone)]
pub struct FinalizeExecution {
    pub status: &'static str,
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub finished_at: Timestamp,
    pub duration_ms: i64,
}

/// Filters for the execution log listing endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionFilter {
    pub script_id: Option<DbId>,
    pub status: Option<String>,
    pub date_from: Option<Timestamp>,
    pub date_to: Option<Timestamp>,
    /// Free-text search over stdout and stderr.
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Aggregate statistics over a window of execution records.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExecutionStats {
    pub total_executions: i64,
    pub successful_executions: i64,
    pub failed_executions: i64,
    pub avg_duration_ms: Option<f64>,
    pub first_execution: Option<Timestamp>,
    pub last_execution: Option<Timestamp>,
}

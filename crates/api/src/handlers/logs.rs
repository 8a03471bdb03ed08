//! Execution log listing, detail, deletion, and statistics handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;

use tempo_core::error::CoreError;
use tempo_core::types::DbId;
use tempo_db::models::execution::{ExecutionFilter, ExecutionRecord, ExecutionStats};
use tempo_db::repositories::{ExecutionRepo, ScriptRepo};

use crate::error::{AppError, AppResult};
use crate::middleware::{AuthUser, RequireAdmin};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    #[serde(default = "default_cleanup_days")]
    pub days: i64,
}

fn default_cleanup_days() -> i64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub script_id: Option<DbId>,
    #[serde(default = "default_cleanup_days")]
    pub days: i64,
}

/// GET /api/logs
///
/// Filters: `script_id`, `status`, `date_from`, `date_to` (RFC 3339),
/// `search` (free text over stdout/stderr), `limit`, `offset`.
pub async fn list_logs(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(filter): Query<ExecutionFilter>,
) -> AppResult<Json<DataResponse<Vec<ExecutionRecord>>>> {
    let records = ExecutionRepo::list(&state.pool, &filter).await?;
    Ok(Json(DataResponse { data: records }))
}

/// GET /api/logs/{id}
pub async fn get_log(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<ExecutionRecord>>> {
    let record = ExecutionRepo::find_by_id(&state.pool, id).await?.ok_or_else(|| {
        AppError::Core(CoreError::NotFound {
            entity: "execution log",
            id,
        })
    })?;
    Ok(Json(DataResponse { data: record }))
}

/// DELETE /api/logs/{id}
pub async fn delete_log(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<DbId>,
) -> AppResult<Json<serde_json::Value>> {
    if !ExecutionRepo::delete(&state.pool, id).await? {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "execution log",
            id,
        }));
    }
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Execution log deleted successfully",
    })))
}

/// DELETE /api/logs/script/{slug}
pub async fn delete_logs_for_script(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(slug): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let script = ScriptRepo::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Script {slug:?} not found")))?;

    let deleted = ExecutionRepo::delete_for_script(&state.pool, script.id).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "deleted_count": deleted,
    })))
}

/// POST /api/logs/cleanup
///
/// Admin-only bulk deletion of records older than `days`.
pub async fn cleanup_logs(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Json(input): Json<CleanupRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if input.days < 1 {
        return Err(AppError::BadRequest("days must be at least 1".into()));
    }

    let cutoff = Utc::now() - Duration::days(input.days);
    let deleted = ExecutionRepo::delete_older_than(&state.pool, cutoff).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "deleted_count": deleted,
    })))
}

/// GET /api/logs/stats/summary
pub async fn stats_summary(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<StatsQuery>,
) -> AppResult<Json<DataResponse<ExecutionStats>>> {
    let days = query.days.clamp(1, 365);
    let since = Utc::now() - Duration::days(days);
    let stats = ExecutionRepo::stats(&state.pool, query.script_id, since).await?;
    Ok(Json(DataResponse { data: stats }))
}

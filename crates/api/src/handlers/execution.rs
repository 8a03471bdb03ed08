//! Trigger CRUD, execution status, and cron validation handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use tempo_core::error::CoreError;
use tempo_core::types::DbId;
use tempo_db::models::execution::{ExecutionFilter, ExecutionRecord};
use tempo_db::models::trigger::{parse_config, CreateTrigger, Trigger};
use tempo_db::repositories::{ExecutionRepo, ScriptRepo, TriggerRepo};

use crate::engine::scheduler::{compute_next_fire, validate_and_preview, CronPreview};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TriggerListQuery {
    pub script_id: Option<DbId>,
}

#[derive(Debug, Deserialize)]
pub struct UpcomingQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CronValidationRequest {
    pub expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Serialize)]
pub struct ExecutionStatus {
    pub running_executions: Vec<ExecutionRecord>,
    pub recent_executions: Vec<ExecutionRecord>,
    pub total_running: usize,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a trigger DTO: the kind + config must parse, and cron
/// expressions must be schedulable (same parser as the scheduler).
fn validate_trigger_input(input: &CreateTrigger) -> AppResult<String> {
    let config_json = input.config.to_string();
    let config = parse_config(&input.kind, &config_json).map_err(AppError::Core)?;

    if let tempo_db::models::trigger::TriggerConfig::Cron {
        expression,
        timezone,
    } = &config
    {
        let preview = validate_and_preview(expression, timezone);
        if !preview.valid {
            return Err(AppError::Core(CoreError::Validation(
                preview.error.unwrap_or_else(|| "Invalid cron expression".into()),
            )));
        }
    }

    Ok(config_json)
}

/// Initial arming time for a brand-new or replaced trigger.
fn initial_next_fire(trigger: &Trigger) -> Option<chrono::DateTime<chrono::Utc>> {
    if !trigger.enabled {
        return None;
    }
    compute_next_fire(trigger, chrono::Utc::now())
        .ok()
        .flatten()
}

// ---------------------------------------------------------------------------
// Trigger CRUD
// ---------------------------------------------------------------------------

/// POST /api/execution/triggers
pub async fn create_trigger(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(input): Json<CreateTrigger>,
) -> AppResult<(StatusCode, Json<DataResponse<Trigger>>)> {
    if ScriptRepo::find_by_id(&state.pool, input.script_id).await?.is_none() {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "script",
            id: input.script_id,
        }));
    }

    validate_trigger_input(&input)?;

    let trigger = TriggerRepo::create(&state.pool, &input, None).await?;

    // Compute from the stored row so create and rearm share one path.
    let next = initial_next_fire(&trigger);
    if next.is_some() {
        TriggerRepo::set_next_fire(&state.pool, trigger.id, next).await?;
    }
    state.scheduler.notify_trigger_changed(trigger.id);

    let trigger = TriggerRepo::find_by_id(&state.pool, trigger.id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
        .map_err(AppError::Database)?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: trigger })))
}

/// GET /api/execution/triggers
pub async fn list_triggers(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<TriggerListQuery>,
) -> AppResult<Json<DataResponse<Vec<Trigger>>>> {
    let triggers = TriggerRepo::list(&state.pool, query.script_id).await?;
    Ok(Json(DataResponse { data: triggers }))
}

/// GET /api/execution/triggers/upcoming
pub async fn upcoming_triggers(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<UpcomingQuery>,
) -> AppResult<Json<DataResponse<Vec<Trigger>>>> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let triggers = TriggerRepo::upcoming(&state.pool, limit).await?;
    Ok(Json(DataResponse { data: triggers }))
}

/// GET /api/execution/triggers/{id}
pub async fn get_trigger(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Trigger>>> {
    let trigger = TriggerRepo::find_by_id(&state.pool, id).await?.ok_or_else(|| {
        AppError::Core(CoreError::NotFound {
            entity: "trigger",
            id,
        })
    })?;
    Ok(Json(DataResponse { data: trigger }))
}

/// PUT /api/execution/triggers/{id}
pub async fn update_trigger(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<DbId>,
    Json(input): Json<CreateTrigger>,
) -> AppResult<Json<DataResponse<Trigger>>> {
    if TriggerRepo::find_by_id(&state.pool, id).await?.is_none() {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "trigger",
            id,
        }));
    }

    let config_json = validate_trigger_input(&input)?;

    let trigger = TriggerRepo::update(&state.pool, id, &input.kind, &config_json, input.enabled, None)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "trigger",
                id,
            })
        })?;

    state.scheduler.notify_trigger_changed(id);

    Ok(Json(DataResponse { data: trigger }))
}

/// DELETE /api/execution/triggers/{id}
pub async fn delete_trigger(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<DbId>,
) -> AppResult<Json<serde_json::Value>> {
    if !TriggerRepo::delete(&state.pool, id).await? {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "trigger",
            id,
        }));
    }

    state.scheduler.notify_trigger_changed(id);

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Trigger deleted successfully",
    })))
}

/// POST /api/execution/triggers/{id}/toggle
pub async fn toggle_trigger(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<DbId>,
) -> AppResult<Json<serde_json::Value>> {
    let enabled = TriggerRepo::toggle(&state.pool, id).await?.ok_or_else(|| {
        AppError::Core(CoreError::NotFound {
            entity: "trigger",
            id,
        })
    })?;

    state.scheduler.notify_trigger_changed(id);

    Ok(Json(serde_json::json!({
        "success": true,
        "enabled": enabled,
    })))
}

// ---------------------------------------------------------------------------
// Status and validation
// ---------------------------------------------------------------------------

/// GET /api/execution/status
pub async fn execution_status(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> AppResult<Json<ExecutionStatus>> {
    let running = ExecutionRepo::list_running(&state.pool).await?;

    let recent: Vec<ExecutionRecord> = ExecutionRepo::list(
        &state.pool,
        &ExecutionFilter {
            limit: Some(20),
            ..Default::default()
        },
    )
    .await?
    .into_iter()
    .filter(|r| r.status != tempo_core::scripting::status::STATUS_RUNNING)
    .take(10)
    .collect();

    Ok(Json(ExecutionStatus {
        total_running: running.len(),
        running_executions: running,
        recent_executions: recent,
    }))
}

/// POST /api/execution/validate-cron
pub async fn validate_cron(
    _auth: AuthUser,
    Json(input): Json<CronValidationRequest>,
) -> Json<CronPreview> {
    Json(validate_and_preview(&input.expression, &input.timezone))
}

//! Script CRUD, execution, and environment introspection handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tempo_core::error::CoreError;
use tempo_core::scripting::environment::{EnvironmentManager, VenvInfo};
use tempo_core::scripting::syntax::{check_python_syntax, SyntaxCheck};
use tempo_core::validation;
use tempo_db::models::script::{CreateScript, Script, UpdateScript};
use tempo_db::models::setting::KEY_API_KEY;
use tempo_db::repositories::{ExecutionRepo, FolderRepo, ScriptRepo, SettingsRepo};
use tempo_events::{EventBus, EventKind, RunEvent};

use crate::engine::queue::{EnqueueError, RunRequest, TriggeredBy};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Body for the debounced auto-save endpoint.
#[derive(Debug, Deserialize)]
pub struct AutoSaveRequest {
    pub content: String,
}

/// Response for execute/url-trigger: the request is queued, not done.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub task_id: Uuid,
    pub status: &'static str,
    pub script_id: i64,
}

/// Query parameter for the URL trigger endpoint.
#[derive(Debug, Deserialize)]
pub struct UrlTriggerParams {
    pub api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Run all write-boundary checks shared by create and update.
async fn validate_script_inputs(
    name: Option<&str>,
    content: Option<&str>,
    python_version: Option<&str>,
    requirements: Option<&str>,
    environment: Option<&std::collections::BTreeMap<String, String>>,
) -> AppResult<()> {
    if let Some(name) = name {
        validation::validate_script_name(name).map_err(AppError::Core)?;
    }
    if let Some(version) = python_version {
        validation::validate_python_version(version).map_err(AppError::Core)?;
    }
    if let Some(requirements) = requirements {
        validation::validate_requirements(requirements).map_err(AppError::Core)?;
    }
    if let Some(environment) = environment {
        validation::validate_environment(environment).map_err(AppError::Core)?;
    }
    if let Some(content) = content {
        if let SyntaxCheck::Invalid(message) = check_python_syntax(content).await {
            return Err(AppError::Core(CoreError::Validation(message)));
        }
    }
    Ok(())
}

async fn load_by_slug(state: &AppState, slug: &str) -> AppResult<Script> {
    ScriptRepo::find_by_slug(&state.pool, slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Script {slug:?} not found")))
}

fn manager_for(state: &AppState, script: &Script) -> EnvironmentManager {
    EnvironmentManager::new(
        &state.config.data_path,
        script.folder_name.as_deref(),
        &script.slug,
    )
}

/// Provision (or re-synchronize) a script's environment off the request
/// path, emitting `env.ready` / `env.failed`.
fn provision_in_background(state: &AppState, script: &Script) {
    let manager = manager_for(state, script);
    let bus: Arc<EventBus> = Arc::clone(&state.event_bus);
    let script_id = script.id;
    let content = script.content.clone();
    let python_version = script.python_version.clone();
    let requirements = script.requirements.clone();

    tokio::spawn(async move {
        let result = match manager.write_source(&content).await {
            Ok(()) => manager.provision(&python_version, &requirements).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(report) => {
                bus.publish(RunEvent::new(EventKind::EnvReady, script_id).with_payload(
                    serde_json::json!({
                        "created": report.created,
                        "installed": report.installed,
                    }),
                ));
            }
            Err(e) => {
                tracing::warn!(script_id, error = %e, "background environment provisioning failed");
                bus.publish(RunEvent::new(EventKind::EnvFailed, script_id).with_payload(
                    serde_json::json!({
                        "phase": e.phase.as_str(),
                        "error": e.detail,
                    }),
                ));
            }
        }
    });
}

// ---------------------------------------------------------------------------
// CRUD handlers
// ---------------------------------------------------------------------------

/// GET /api/scripts
pub async fn list_scripts(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> AppResult<Json<DataResponse<Vec<Script>>>> {
    let scripts = ScriptRepo::list_all(&state.pool).await?;
    Ok(Json(DataResponse { data: scripts }))
}

/// POST /api/scripts
pub async fn create_script(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(input): Json<CreateScript>,
) -> AppResult<(StatusCode, Json<DataResponse<Script>>)> {
    validate_script_inputs(
        Some(&input.name),
        Some(&input.content),
        Some(&input.python_version),
        Some(&input.requirements),
        Some(&input.environment),
    )
    .await?;

    if let Some(folder_id) = input.folder_id {
        if FolderRepo::find_by_id(&state.pool, folder_id).await?.is_none() {
            return Err(AppError::Core(CoreError::NotFound {
                entity: "folder",
                id: folder_id,
            }));
        }
    }

    if ScriptRepo::name_exists(&state.pool, &input.name, input.folder_id, None).await? {
        return Err(AppError::Core(CoreError::Conflict(
            "Script name already exists in this folder".into(),
        )));
    }

    let slug =
        ScriptRepo::ensure_unique_slug(&state.pool, &input.name, input.folder_id, None).await?;
    let script = ScriptRepo::create(&state.pool, &input, &slug).await?;

    provision_in_background(&state, &script);

    Ok((StatusCode::CREATED, Json(DataResponse { data: script })))
}

/// GET /api/scripts/{slug}
pub async fn get_script(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(slug): Path<String>,
) -> AppResult<Json<DataResponse<Script>>> {
    let script = load_by_slug(&state, &slug).await?;
    Ok(Json(DataResponse { data: script }))
}

/// PUT /api/scripts/{slug}
pub async fn update_script(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(slug): Path<String>,
    Json(input): Json<UpdateScript>,
) -> AppResult<Json<DataResponse<Script>>> {
    let existing = load_by_slug(&state, &slug).await?;

    validate_script_inputs(
        input.name.as_deref(),
        input.content.as_deref(),
        input.python_version.as_deref(),
        input.requirements.as_deref(),
        input.environment.as_ref(),
    )
    .await?;

    // A rename re-derives the slug (and thus the on-disk directory).
    let new_slug = match &input.name {
        Some(name) if *name != existing.name => {
            let folder_id = input.folder_id.or(existing.folder_id);
            if ScriptRepo::name_exists(&state.pool, name, folder_id, Some(existing.id)).await? {
                return Err(AppError::Core(CoreError::Conflict(
                    "Script name already exists in this folder".into(),
                )));
            }
            Some(
                ScriptRepo::ensure_unique_slug(&state.pool, name, folder_id, Some(existing.id))
                    .await?,
            )
        }
        _ => None,
    };

    let requirements_changed = input
        .requirements
        .as_ref()
        .is_some_and(|r| *r != existing.requirements);
    let enabled_changed = input.enabled.is_some_and(|e| e != existing.enabled);

    let updated = ScriptRepo::update(&state.pool, existing.id, &input, new_slug.as_deref())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Script {slug:?} not found")))?;

    // The old directory is stale after a rename; drop it before the
    // fresh provision below recreates the tree under the new slug.
    if new_slug.is_some() {
        let old_manager = manager_for(&state, &existing);
        if let Err(e) = old_manager.cleanup().await {
            tracing::warn!(script_id = existing.id, error = %e, "failed to remove renamed script directory");
        }
    }

    if new_slug.is_some() || requirements_changed {
        provision_in_background(&state, &updated);
    }

    // Pausing a script pauses all its triggers.
    if enabled_changed {
        state.scheduler.notify_script_changed(updated.id);
    }

    Ok(Json(DataResponse { data: updated }))
}

/// PATCH /api/scripts/{slug}/auto-save
pub async fn auto_save(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(slug): Path<String>,
    Json(input): Json<AutoSaveRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if input.content.trim().is_empty() {
        return Err(AppError::BadRequest("Script content cannot be empty".into()));
    }

    let saved = ScriptRepo::auto_save_content(&state.pool, &slug, &input.content).await?;
    if !saved {
        return Err(AppError::NotFound(
            "Script not found or auto-save disabled".into(),
        ));
    }

    Ok(Json(serde_json::json!({
        "success": true,
        "saved_at": chrono::Utc::now(),
    })))
}

/// DELETE /api/scripts/{slug}
pub async fn delete_script(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(slug): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let script = load_by_slug(&state, &slug).await?;

    // The environment tree goes first; a failure there must not leave a
    // catalog row pointing at a half-deleted directory.
    let manager = manager_for(&state, &script);
    if let Err(e) = manager.cleanup().await {
        tracing::warn!(script_id = script.id, error = %e, "failed to remove script directory");
    }

    ScriptRepo::delete(&state.pool, script.id).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Script deleted successfully",
    })))
}

// ---------------------------------------------------------------------------
// Execution handlers
// ---------------------------------------------------------------------------

/// Shared enqueue path for manual and URL-triggered runs.
async fn enqueue_run(
    state: &AppState,
    slug: &str,
    triggered_by: TriggeredBy,
) -> AppResult<ExecuteResponse> {
    let script = load_by_slug(state, slug).await?;
    if !script.enabled {
        return Err(AppError::NotFound(format!(
            "Script {slug:?} not found or disabled"
        )));
    }

    // Reject up front so the client gets a synchronous 409; the worker
    // re-checks atomically when it claims the request.
    if ExecutionRepo::find_running_for_script(&state.pool, script.id)
        .await?
        .is_some()
    {
        return Err(AppError::Core(CoreError::Conflict("already_running".into())));
    }

    let request = RunRequest::new(script.id, None, triggered_by);
    let task_id = request.request_id;
    state.run_queue.try_enqueue(request).map_err(|e| match e {
        EnqueueError::QueueFull => AppError::Core(CoreError::Capacity("queue_full".into())),
        EnqueueError::ShuttingDown => {
            AppError::Core(CoreError::Capacity("shutting down".into()))
        }
    })?;

    Ok(ExecuteResponse {
        task_id,
        status: "queued",
        script_id: script.id,
    })
}

/// POST /api/scripts/{slug}/execute
pub async fn execute_script(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(slug): Path<String>,
) -> AppResult<Json<ExecuteResponse>> {
    let response = enqueue_run(&state, &slug, TriggeredBy::Manual).await?;
    Ok(Json(response))
}

/// GET /api/scripts/{slug}/trigger?api_key=…
///
/// Unauthenticated, guarded by the API key from the settings table.
/// A bad or missing key is rejected before the script is even loaded,
/// so no record is created and no events are emitted.
pub async fn url_trigger(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(params): Query<UrlTriggerParams>,
) -> AppResult<Json<ExecuteResponse>> {
    let stored = SettingsRepo::get(&state.pool, KEY_API_KEY).await?;
    let presented = params.api_key.as_deref().unwrap_or_default();
    let valid = stored.as_deref().is_some_and(|key| key == presented && !key.is_empty());
    if !valid {
        return Err(AppError::Core(CoreError::Unauthorized(
            "Invalid API key".into(),
        )));
    }

    let response = enqueue_run(&state, &slug, TriggeredBy::Url).await?;
    Ok(Json(response))
}

/// GET /api/scripts/{slug}/venv-info
pub async fn venv_info(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(slug): Path<String>,
) -> AppResult<Json<DataResponse<VenvInfo>>> {
    let script = load_by_slug(&state, &slug).await?;
    let info = manager_for(&state, &script).introspect().await;
    Ok(Json(DataResponse { data: info }))
}

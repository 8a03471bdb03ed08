//! Folder CRUD handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use tempo_core::error::CoreError;
use tempo_core::scripting::environment::EnvironmentManager;
use tempo_core::types::DbId;
use tempo_db::models::folder::{CreateFolder, Folder};
use tempo_db::repositories::{FolderRepo, ScriptRepo};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/folders
pub async fn list_folders(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> AppResult<Json<DataResponse<Vec<Folder>>>> {
    let folders = FolderRepo::list_all(&state.pool).await?;
    Ok(Json(DataResponse { data: folders }))
}

/// POST /api/folders
pub async fn create_folder(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(input): Json<CreateFolder>,
) -> AppResult<(StatusCode, Json<DataResponse<Folder>>)> {
    if input.name.trim().is_empty() {
        return Err(AppError::BadRequest("Folder name cannot be empty".into()));
    }

    if let Some(parent_id) = input.parent_id {
        if FolderRepo::find_by_id(&state.pool, parent_id).await?.is_none() {
            return Err(AppError::Core(CoreError::NotFound {
                entity: "folder",
                id: parent_id,
            }));
        }
    }

    if FolderRepo::name_exists(&state.pool, &input.name, input.parent_id).await? {
        return Err(AppError::Core(CoreError::Conflict(
            "Folder name already exists in parent folder".into(),
        )));
    }

    let folder = FolderRepo::create(&state.pool, &input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: folder })))
}

/// DELETE /api/folders/{id}
///
/// Cascades into contained scripts: their on-disk trees are removed
/// first, then the catalog rows go via foreign-key cascade.
pub async fn delete_folder(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<DbId>,
) -> AppResult<Json<serde_json::Value>> {
    if FolderRepo::find_by_id(&state.pool, id).await?.is_none() {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "folder",
            id,
        }));
    }

    let scripts = ScriptRepo::list_in_folder(&state.pool, id).await?;
    for script in &scripts {
        let manager = EnvironmentManager::new(
            &state.config.data_path,
            script.folder_name.as_deref(),
            &script.slug,
        );
        if let Err(e) = manager.cleanup().await {
            tracing::warn!(script_id = script.id, error = %e, "failed to remove script directory");
        }
    }

    FolderRepo::delete(&state.pool, id).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "deleted_scripts": scripts.len(),
    })))
}

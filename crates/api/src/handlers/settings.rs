//! Admin settings handlers.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;

use tempo_db::models::setting::Setting;
use tempo_db::repositories::SettingsRepo;

use crate::error::AppResult;
use crate::middleware::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/settings
pub async fn list_settings(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> AppResult<Json<DataResponse<Vec<Setting>>>> {
    let settings = SettingsRepo::list_all(&state.pool).await?;
    Ok(Json(DataResponse { data: settings }))
}

/// PUT /api/settings
///
/// Body is a flat key/value object; unknown keys are stored as-is so
/// the operator can stash front-end preferences alongside the
/// well-known keys.
pub async fn update_settings(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Json(input): Json<BTreeMap<String, String>>,
) -> AppResult<Json<serde_json::Value>> {
    for (key, value) in &input {
        SettingsRepo::set(&state.pool, key, value).await?;
    }

    Ok(Json(serde_json::json!({
        "success": true,
        "updated": input.len(),
    })))
}

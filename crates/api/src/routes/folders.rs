//! Route definitions for folder endpoints.

use axum::routing::get;
use axum::Router;

use crate::handlers::folders;
use crate::state::AppState;

/// Routes mounted at `/api/folders`.
///
/// ```text
/// GET    /      -> list_folders
/// POST   /      -> create_folder
/// DELETE /{id}  -> delete_folder (cascades into contained scripts)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(folders::list_folders).post(folders::create_folder))
        .route("/{id}", axum::routing::delete(folders::delete_folder))
}

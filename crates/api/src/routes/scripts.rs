//! Route definitions for script management and execution endpoints.

use axum::routing::{get, patch, post};
use axum::Router;

use crate::handlers::scripts;
use crate::state::AppState;

/// Routes mounted at `/api/scripts`.
///
/// ```text
/// GET    /                    -> list_scripts
/// POST   /                    -> create_script
/// GET    /{slug}              -> get_script
/// PUT    /{slug}              -> update_script
/// DELETE /{slug}              -> delete_script
/// PATCH  /{slug}/auto-save    -> auto_save
/// POST   /{slug}/execute      -> execute_script
/// GET    /{slug}/trigger      -> url_trigger (API-key guarded)
/// GET    /{slug}/venv-info    -> venv_info
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(scripts::list_scripts).post(scripts::create_script))
        .route(
            "/{slug}",
            get(scripts::get_script)
                .put(scripts::update_script)
                .delete(scripts::delete_script),
        )
        .route("/{slug}/auto-save", patch(scripts::auto_save))
        .route("/{slug}/execute", post(scripts::execute_script))
        .route("/{slug}/trigger", get(scripts::url_trigger))
        .route("/{slug}/venv-info", get(scripts::venv_info))
}

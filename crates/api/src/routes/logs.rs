//! Route definitions for execution log endpoints.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::logs;
use crate::state::AppState;

/// Routes mounted at `/api/logs`.
///
/// ```text
/// GET    /               -> list_logs (filters via query string)
/// GET    /{id}           -> get_log
/// DELETE /{id}           -> delete_log
/// DELETE /script/{slug}  -> delete_logs_for_script
/// POST   /cleanup        -> cleanup_logs (admin)
/// GET    /stats/summary  -> stats_summary
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(logs::list_logs))
        .route("/{id}", get(logs::get_log).delete(logs::delete_log))
        .route("/script/{slug}", delete(logs::delete_logs_for_script))
        .route("/cleanup", post(logs::cleanup_logs))
        .route("/stats/summary", get(logs::stats_summary))
}

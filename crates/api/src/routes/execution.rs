//! Route definitions for triggers, execution status, and cron
//! validation.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::execution;
use crate::state::AppState;

/// Routes mounted at `/api/execution`.
///
/// ```text
/// GET  /status                  -> execution_status
/// POST /validate-cron           -> validate_cron
/// GET  /triggers                -> list_triggers
/// POST /triggers                -> create_trigger
/// GET  /triggers/upcoming       -> upcoming_triggers
/// GET  /triggers/{id}           -> get_trigger
/// PUT  /triggers/{id}           -> update_trigger
/// DELETE /triggers/{id}         -> delete_trigger
/// POST /triggers/{id}/toggle    -> toggle_trigger
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(execution::execution_status))
        .route("/validate-cron", post(execution::validate_cron))
        .route(
            "/triggers",
            get(execution::list_triggers).post(execution::create_trigger),
        )
        .route("/triggers/upcoming", get(execution::upcoming_triggers))
        .route(
            "/triggers/{id}",
            get(execution::get_trigger)
                .put(execution::update_trigger)
                .delete(execution::delete_trigger),
        )
        .route("/triggers/{id}/toggle", post(execution::toggle_trigger))
}

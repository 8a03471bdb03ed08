//! Route definitions for admin settings endpoints.

use axum::routing::get;
use axum::Router;

use crate::handlers::settings;
use crate::state::AppState;

/// Routes mounted at `/api/settings` (admin only).
///
/// ```text
/// GET /  -> list_settings
/// PUT /  -> update_settings
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/",
        get(settings::list_settings).put(settings::update_settings),
    )
}

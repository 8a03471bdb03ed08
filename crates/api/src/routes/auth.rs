//! Route definitions for authentication endpoints.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::auth;
use crate::state::AppState;

/// Routes mounted at `/api/auth`.
///
/// ```text
/// POST /login      -> login
/// POST /register   -> register
/// GET  /me         -> me
/// GET  /timezones  -> timezones
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(auth::login))
        .route("/register", post(auth::register))
        .route("/me", get(auth::me))
        .route("/timezones", get(auth::timezones))
}

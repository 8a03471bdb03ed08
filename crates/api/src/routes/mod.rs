//! Route definitions, one module per resource, assembled by
//! [`api_routes`].

pub mod auth;
pub mod execution;
pub mod folders;
pub mod health;
pub mod logs;
pub mod scripts;
pub mod settings;

use axum::Router;

use crate::state::AppState;

/// All `/api/...` routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router())
        .nest("/scripts", scripts::router())
        .nest("/folders", folders::router())
        .nest("/execution", execution::router())
        .nest("/logs", logs::router())
        .nest("/settings", settings::router())
        .merge(health::router())
}

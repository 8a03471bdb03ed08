//! Request extractors enforcing authentication and authorization.

pub mod auth;

pub use auth::{AuthUser, RequireAdmin};

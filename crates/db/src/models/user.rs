//! User entity model and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tempo_core::types::{DbId, Timestamp};

/// An account able to authenticate against the HTTP surface.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: DbId,
    pub username: String,
    pub email: String,
    /// Argon2id PHC string. Never serialized to clients.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub theme: String,
    pub timezone: String,
    pub is_admin: bool,
    pub created_at: Timestamp,
    pub last_login_at: Option<Timestamp>,
}

/// DTO for registration and admin seeding.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
}

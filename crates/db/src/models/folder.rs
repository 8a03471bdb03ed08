//! Folder entity model and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tempo_core::types::{DbId, Timestamp};

/// A tree node organizing scripts. Deletion cascades into contained
/// scripts (and through them into triggers and execution records).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Folder {
    pub id: DbId,
    pub name: String,
    pub parent_id: Option<DbId>,
    pub created_at: Timestamp,
}

/// DTO for creating a folder.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFolder {
    pub name: String,
    pub parent_id: Option<DbId>,
}

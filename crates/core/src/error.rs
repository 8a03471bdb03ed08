//! Domain error taxonomy.
//!
//! Mirrors the error kinds surfaced at the HTTP boundary: validation,
//! conflict, capacity, auth, and internal failures. Execution and
//! environment errors have their own richer types in [`crate::scripting`]
//! because they carry phase and captured-output detail.

use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A bounded resource (run queue, mailbox) rejected new work.
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

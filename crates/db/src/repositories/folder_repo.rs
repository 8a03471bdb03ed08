//! Repository for the `folders` table.

use chrono::Utc;
use tempo_core::types::DbId;

use crate::models::folder::{CreateFolder, Folder};
use crate::DbPool;

const COLUMNS: &str = "id, name, parent_id, created_at";

/// Provides CRUD operations for folders.
pub struct FolderRepo;

impl FolderRepo {
    pub async fn create(pool: &DbPool, input: &CreateFolder) -> Result<Folder, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO folders (name, parent_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(&input.name)
        .bind(input.parent_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Self::find_by_id(pool, result.last_insert_rowid())
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id(pool: &DbPool, id: DbId) -> Result<Option<Folder>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM folders WHERE id = ?");
        sqlx::query_as::<_, Folder>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_all(pool: &DbPool) -> Result<Vec<Folder>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM folders ORDER BY name");
        sqlx::query_as::<_, Folder>(&query).fetch_all(pool).await
    }

    pub async fn name_exists(
        pool: &DbPool,
        name: &str,
        parent_id: Option<DbId>,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM folders WHERE name = ? AND parent_id IS ?)",
        )
        .bind(name)
        .bind(parent_id)
        .fetch_one(pool)
        .await
    }

    /// Delete a folder; contained scripts (and their triggers and
    /// execution records) cascade via foreign keys.
    pub async fn delete(pool: &DbPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

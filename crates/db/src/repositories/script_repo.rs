//! Repository for the `scripts` table.

use chrono::Utc;
use sqlx::Row;
use tempo_core::naming;
use tempo_core::types::{DbId, Timestamp};

use crate::models::script::{CreateScript, Script, UpdateScript};
use crate::DbPool;

/// Column list for `scripts` queries, including the joined folder name.
const COLUMNS: &str = "\
    s.id, s.name, s.slug, s.description, s.content, s.folder_id, \
    f.name AS folder_name, \
    s.python_version, s.requirements, s.environment_json, \
    s.enabled, s.run_total, s.run_success, s.last_run_at, s.timeout_secs, \
    s.email_on_completion, s.email_recipients, s.email_trigger, \
    s.auto_save, s.created_at, s.updated_at";

/// Join clause shared by all read queries.
const JOIN: &str = "scripts s LEFT JOIN folders f ON s.folder_id = f.id";

/// Provides CRUD and counter operations for scripts.
pub struct ScriptRepo;

impl ScriptRepo {
    /// Derive a slug from `name` that is unique within `folder_id`,
    /// appending `-2`, `-3`, … on collision. `exclude_id` skips the
    /// script being renamed.
    pub async fn ensure_unique_slug(
        pool: &DbPool,
        name: &str,
        folder_id: Option<DbId>,
        exclude_id: Option<DbId>,
    ) -> Result<String, sqlx::Error> {
        let base = naming::slugify(name);

        for attempt in 1..=u32::MAX {
            let candidate = naming::slug_candidate(&base, attempt);
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS(\
                     SELECT 1 FROM scripts \
                     WHERE slug = ? AND folder_id IS ? AND (? IS NULL OR id != ?))",
            )
            .bind(&candidate)
            .bind(folder_id)
            .bind(exclude_id)
            .bind(exclude_id)
            .fetch_one(pool)
            .await?;

            if !taken {
                return Ok(candidate);
            }
        }

        unreachable!("u32::MAX slug collisions")
    }

    /// Insert a new script with a pre-computed unique slug.
    pub async fn create(
        pool: &DbPool,
        input: &CreateScript,
        slug: &str,
    ) -> Result<Script, sqlx::Error> {
        let environment_json =
            serde_json::to_string(&input.environment).unwrap_or_else(|_| "{}".to_string());
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO scripts (\
                 name, slug, description, content, folder_id, \
                 python_version, requirements, environment_json, \
                 email_on_completion, email_recipients, email_trigger, \
                 auto_save, timeout_secs, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&input.name)
        .bind(slug)
        .bind(&input.description)
        .bind(&input.content)
        .bind(input.folder_id)
        .bind(&input.python_version)
        .bind(&input.requirements)
        .bind(&environment_json)
        .bind(input.email_on_completion)
        .bind(&input.email_recipients)
        .bind(&input.email_trigger)
        .bind(input.auto_save)
        .bind(input.timeout_secs)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::find_by_id(pool, result.last_insert_rowid())
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id(pool: &DbPool, id: DbId) -> Result<Option<Script>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM {JOIN} WHERE s.id = ?");
        sqlx::query_as::<_, Script>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_slug(pool: &DbPool, slug: &str) -> Result<Option<Script>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM {JOIN} WHERE s.slug = ?");
        sqlx::query_as::<_, Script>(&query)
            .bind(slug)
            .fetch_optional(pool)
            .await
    }

    /// Does a script with this display name already exist in the folder?
    pub async fn name_exists(
        pool: &DbPool,
        name: &str,
        folder_id: Option<DbId>,
        exclude_id: Option<DbId>,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS(\
                 SELECT 1 FROM scripts \
                 WHERE name = ? AND folder_id IS ? AND (? IS NULL OR id != ?))",
        )
        .bind(name)
        .bind(folder_id)
        .bind(exclude_id)
        .bind(exclude_id)
        .fetch_one(pool)
        .await
    }

    /// List all scripts, folders first, then by name.
    pub async fn list_all(pool: &DbPool) -> Result<Vec<Script>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM {JOIN} ORDER BY f.name NULLS FIRST, s.name");
        sqlx::query_as::<_, Script>(&query).fetch_all(pool).await
    }

    /// Scripts contained in one folder (for cascade cleanup).
    pub async fn list_in_folder(
        pool: &DbPool,
        folder_id: DbId,
    ) -> Result<Vec<Script>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM {JOIN} WHERE s.folder_id = ?");
        sqlx::query_as::<_, Script>(&query)
            .bind(folder_id)
            .fetch_all(pool)
            .await
    }

    /// Update a script. Only non-`None` fields in `input` are applied;
    /// `slug` must be provided (recomputed) when the name changes.
    pub async fn update(
        pool: &DbPool,
        id: DbId,
        input: &UpdateScript,
        slug: Option<&str>,
    ) -> Result<Option<Script>, sqlx::Error> {
        let environment_json = input
            .environment
            .as_ref()
            .map(|env| serde_json::to_string(env).unwrap_or_else(|_| "{}".to_string()));

        sqlx::query(
            "UPDATE scripts SET \
                 name = COALESCE(?, name), \
                 slug = COALESCE(?, slug), \
                 description = COALESCE(?, description), \
                 content = COALESCE(?, content), \
                 folder_id = COALESCE(?, folder_id), \
                 python_version = COALESCE(?, python_version), \
                 requirements = COALESCE(?, requirements), \
                 environment_json = COALESCE(?, environment_json), \
                 enabled = COALESCE(?, enabled), \
                 email_on_completion = COALESCE(?, email_on_completion), \
                 email_recipients = COALESCE(?, email_recipients), \
                 email_trigger = COALESCE(?, email_trigger), \
                 auto_save = COALESCE(?, auto_save), \
                 timeout_secs = COALESCE(?, timeout_secs), \
                 updated_at = ? \
             WHERE id = ?",
        )
        .bind(&input.name)
        .bind(slug)
        .bind(&input.description)
        .bind(&input.content)
        .bind(input.folder_id)
        .bind(&input.python_version)
        .bind(&input.requirements)
        .bind(&environment_json)
        .bind(input.enabled)
        .bind(input.email_on_completion)
        .bind(&input.email_recipients)
        .bind(&input.email_trigger)
        .bind(input.auto_save)
        .bind(input.timeout_secs)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        Self::find_by_id(pool, id).await
    }

    /// Debounced content save. Honored only when the script has
    /// auto-save enabled; returns whether a row was written.
    pub async fn auto_save_content(
        pool: &DbPool,
        slug: &str,
        content: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE scripts SET content = ?, updated_at = ? \
             WHERE slug = ? AND auto_save = 1",
        )
        .bind(content)
        .bind(Utc::now())
        .bind(slug)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Atomically bump run counters after a terminal run.
    ///
    /// `run_total` always increments; `run_success` only on success.
    pub async fn record_run_result(
        pool: &DbPool,
        id: DbId,
        success: bool,
        at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE scripts SET \
                 run_total = run_total + 1, \
                 run_success = run_success + ?, \
                 last_run_at = ? \
             WHERE id = ?",
        )
        .bind(if success { 1 } else { 0 })
        .bind(at)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Delete a script; triggers and execution records cascade.
    pub async fn delete(pool: &DbPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM scripts WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Folder name for a folder id; `None` for missing or root.
    pub async fn folder_name(
        pool: &DbPool,
        folder_id: Option<DbId>,
    ) -> Result<Option<String>, sqlx::Error> {
        let Some(folder_id) = folder_id else {
            return Ok(None);
        };
        let row = sqlx::query("SELECT name FROM folders WHERE id = ?")
            .bind(folder_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("name")))
    }
}

//! Repository for the `triggers` table.

use chrono::Utc;
use tempo_core::types::{DbId, Timestamp};

use crate::models::trigger::{CreateTrigger, Trigger};
use crate::DbPool;

/// Column list for `triggers` queries.
const COLUMNS: &str = "\
    id, script_id, kind, config_json, enabled, created_at, \
    last_fired_at, next_fire_at";

/// Provides CRUD and fire-state operations for triggers.
pub struct TriggerRepo;

impl TriggerRepo {
    /// Insert a trigger. `next_fire_at` is the scheduler's initial
    /// arming time (NULL for manual/startup kinds).
    pub async fn create(
        pool: &DbPool,
        input: &CreateTrigger,
        next_fire_at: Option<Timestamp>,
    ) -> Result<Trigger, sqlx::Error> {
        let config_json = input.config.to_string();

        let result = sqlx::query(
            "INSERT INTO triggers (script_id, kind, config_json, enabled, created_at, next_fire_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(input.script_id)
        .bind(&input.kind)
        .bind(&config_json)
        .bind(input.enabled)
        .bind(Utc::now())
        .bind(next_fire_at)
        .execute(pool)
        .await?;

        Self::find_by_id(pool, result.last_insert_rowid())
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id(pool: &DbPool, id: DbId) -> Result<Option<Trigger>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM triggers WHERE id = ?");
        sqlx::query_as::<_, Trigger>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List triggers, optionally restricted to one script.
    pub async fn list(
        pool: &DbPool,
        script_id: Option<DbId>,
    ) -> Result<Vec<Trigger>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM triggers \
             WHERE (? IS NULL OR script_id = ?) \
             ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, Trigger>(&query)
            .bind(script_id)
            .bind(script_id)
            .fetch_all(pool)
            .await
    }

    /// Enabled triggers whose owning script is also enabled.
    ///
    /// This is the scheduler's boot and re-arm working set.
    pub async fn list_armable(pool: &DbPool) -> Result<Vec<Trigger>, sqlx::Error> {
        sqlx::query_as::<_, Trigger>(
            "SELECT t.id, t.script_id, t.kind, t.config_json, t.enabled, \
                    t.created_at, t.last_fired_at, t.next_fire_at \
             FROM triggers t \
             JOIN scripts s ON t.script_id = s.id \
             WHERE t.enabled = 1 AND s.enabled = 1",
        )
        .fetch_all(pool)
        .await
    }

    /// All triggers for one script (used when a script's enabled flag
    /// flips and its timers need pause/resume).
    pub async fn list_for_script(
        pool: &DbPool,
        script_id: DbId,
    ) -> Result<Vec<Trigger>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM triggers WHERE script_id = ?");
        sqlx::query_as::<_, Trigger>(&query)
            .bind(script_id)
            .fetch_all(pool)
            .await
    }

    /// Replace kind, config, and enabled state.
    pub async fn update(
        pool: &DbPool,
        id: DbId,
        kind: &str,
        config_json: &str,
        enabled: bool,
        next_fire_at: Option<Timestamp>,
    ) -> Result<Option<Trigger>, sqlx::Error> {
        sqlx::query(
            "UPDATE triggers SET kind = ?, config_json = ?, enabled = ?, next_fire_at = ? \
             WHERE id = ?",
        )
        .bind(kind)
        .bind(config_json)
        .bind(enabled)
        .bind(next_fire_at)
        .bind(id)
        .execute(pool)
        .await?;

        Self::find_by_id(pool, id).await
    }

    pub async fn delete(pool: &DbPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM triggers WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flip the enabled flag; returns the new state.
    pub async fn toggle(pool: &DbPool, id: DbId) -> Result<Option<bool>, sqlx::Error> {
        let result = sqlx::query("UPDATE triggers SET enabled = NOT enabled WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let enabled: bool = sqlx::query_scalar("SELECT enabled FROM triggers WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(Some(enabled))
    }

    /// Disable a trigger (used when its cron expression fails to parse).
    pub async fn disable(pool: &DbPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE triggers SET enabled = 0, next_fire_at = NULL WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Record a fire: advance `last_fired_at` and re-arm in one
    /// statement so a crash between them cannot double-fire.
    pub async fn record_fire(
        pool: &DbPool,
        id: DbId,
        fired_at: Timestamp,
        next_fire_at: Option<Timestamp>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE triggers SET last_fired_at = ?, next_fire_at = ? WHERE id = ?")
            .bind(fired_at)
            .bind(next_fire_at)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Persist a recomputed `next_fire_at` without advancing the fire
    /// history (arming, not firing).
    pub async fn set_next_fire(
        pool: &DbPool,
        id: DbId,
        next_fire_at: Option<Timestamp>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE triggers SET next_fire_at = ? WHERE id = ?")
            .bind(next_fire_at)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Armed triggers ordered by their next fire time.
    pub async fn upcoming(pool: &DbPool, limit: i64) -> Result<Vec<Trigger>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM triggers \
             WHERE enabled = 1 AND next_fire_at IS NOT NULL \
             ORDER BY next_fire_at ASC \
             LIMIT ?"
        );
        sqlx::query_as::<_, Trigger>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}

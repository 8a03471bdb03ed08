//! First-boot seeding: the admin account and default settings.

use tempo_db::repositories::{SettingsRepo, UserRepo};
use tempo_db::DbPool;

use crate::auth::password::hash_password;
use crate::config::AppConfig;

/// Seed the first admin user (when the users table is empty) and the
/// default settings rows.
pub async fn seed(pool: &DbPool, config: &AppConfig) -> Result<(), sqlx::Error> {
    SettingsRepo::seed_defaults(pool, &config.default_api_key).await?;

    if UserRepo::count(pool).await? > 0 {
        return Ok(());
    }

    let (password, generated) = match &config.admin_password {
        Some(password) => (password.clone(), false),
        None => (uuid::Uuid::new_v4().to_string(), true),
    };

    let password_hash = hash_password(&password).map_err(|e| {
        sqlx::Error::Protocol(format!("failed to hash seed admin password: {e}"))
    })?;

    UserRepo::create(
        pool,
        &config.admin_username,
        &config.admin_email,
        &password_hash,
        true,
    )
    .await?;

    if generated {
        // Logged exactly once, at first boot; set ADMIN_PASSWORD to
        // avoid this.
        tracing::warn!(
            username = %config.admin_username,
            password = %password,
            "Generated admin password (change it after first login)"
        );
    } else {
        tracing::info!(username = %config.admin_username, "Seeded admin user");
    }

    Ok(())
}

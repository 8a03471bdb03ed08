//! Login, registration, and session introspection handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use tempo_core::error::CoreError;
use tempo_db::models::user::{CreateUser, User};
use tempo_db::repositories::UserRepo;

use crate::auth::jwt::generate_access_token;
use crate::auth::password::{hash_password, verify_password, MIN_PASSWORD_LENGTH};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Common timezone choices offered to the front-end dropdown.
const TIMEZONE_CHOICES: &[(&str, &str)] = &[
    ("UTC", "UTC"),
    ("America/New_York", "New York"),
    ("America/Chicago", "Chicago"),
    ("America/Denver", "Denver"),
    ("America/Los_Angeles", "Los Angeles"),
    ("Europe/London", "London"),
    ("Europe/Paris", "Paris"),
    ("Europe/Berlin", "Berlin"),
    ("Asia/Tokyo", "Tokyo"),
    ("Asia/Shanghai", "Shanghai"),
    ("Australia/Sydney", "Sydney"),
];

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub user: User,
}

fn role_of(user: &User) -> &'static str {
    if user.is_admin {
        "admin"
    } else {
        "user"
    }
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let user = UserRepo::find_by_username(&state.pool, &input.username)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized(
                "Incorrect username or password".into(),
            ))
        })?;

    let verified = verify_password(&input.password, &user.password_hash)
        .map_err(|e| AppError::InternalError(format!("password verification failed: {e}")))?;
    if !verified {
        return Err(AppError::Core(CoreError::Unauthorized(
            "Incorrect username or password".into(),
        )));
    }

    UserRepo::touch_last_login(&state.pool, user.id).await?;

    let access_token = generate_access_token(user.id, role_of(&user), &state.config.jwt)
        .map_err(|e| AppError::InternalError(format!("token generation failed: {e}")))?;

    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer",
        user,
    }))
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<CreateUser>,
) -> AppResult<(StatusCode, Json<DataResponse<User>>)> {
    if input.username.trim().len() < 3 {
        return Err(AppError::BadRequest(
            "Username must be at least 3 characters".into(),
        ));
    }
    if !input.email.contains('@') {
        return Err(AppError::BadRequest("Invalid email address".into()));
    }
    if input.password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    if UserRepo::username_exists(&state.pool, &input.username).await? {
        return Err(AppError::Core(CoreError::Conflict(
            "Username already exists".into(),
        )));
    }
    if UserRepo::email_exists(&state.pool, &input.email).await? {
        return Err(AppError::Core(CoreError::Conflict(
            "Email already exists".into(),
        )));
    }

    let password_hash = hash_password(&input.password)
        .map_err(|e| AppError::InternalError(format!("password hashing failed: {e}")))?;

    // Self-registration never grants admin.
    let user = UserRepo::create(&state.pool, &input.username, &input.email, &password_hash, false)
        .await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: user })))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<DataResponse<User>>> {
    let user = UserRepo::find_by_id(&state.pool, auth.user_id)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "user",
                id: auth.user_id,
            })
        })?;
    Ok(Json(DataResponse { data: user }))
}

#[derive(Debug, Serialize)]
pub struct TimezoneChoice {
    pub value: &'static str,
    pub label: &'static str,
}

/// GET /api/auth/timezones
pub async fn timezones(_auth: AuthUser) -> Json<DataResponse<Vec<TimezoneChoice>>> {
    let choices = TIMEZONE_CHOICES
        .iter()
        .map(|&(value, label)| TimezoneChoice { value, label })
        .collect();
    Json(DataResponse { data: choices })
}

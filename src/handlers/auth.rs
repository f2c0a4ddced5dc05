// src/handlers/auth.rs

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use tower_cookies::Cookies;
use validator::Validate;

use crate::{
    config::Config,
    error::{AppError, is_unique_violation, violated_constraint},
    models::user::{LoginRequest, RegisterRequest, USER_COLUMNS, User},
    services::gamification,
    utils::{
        cookies::{REFRESH_COOKIE, clear_auth_cookies, set_auth_cookies},
        hash::{hash_password, hash_token, verify_password},
        jwt::{Claims, TokenType, sign_access_token, sign_refresh_token, verify_jwt},
    },
};

/// Signs an access/refresh pair, stores the refresh hash and sets cookies.
async fn issue_session(
    conn: &mut PgConnection,
    cookies: &Cookies,
    config: &Config,
    user: &User,
) -> Result<(), AppError> {
    let access = sign_access_token(user.id, &user.role, config)?;
    let refresh = sign_refresh_token(user.id, &user.role, config)?;
    let expires_at = Utc::now() + Duration::seconds(config.jwt_refresh_expiration as i64);

    sqlx::query(
        "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
    )
    .bind(user.id)
    .bind(hash_token(&refresh))
    .bind(expires_at)
    .execute(&mut *conn)
    .await?;

    set_auth_cookies(cookies, config, access, refresh);
    Ok(())
}

pub async fn find_user(pool: &PgPool, id: i64) -> Result<User, AppError> {
    sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))
}

/// Registers a new student account and signs it in.
///
/// Hashes the password using Argon2 before storing it.
/// Returns 201 Created and the user object (excluding password).
pub async fn register(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    cookies: Cookies,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let email = payload.email.trim().to_lowercase();
    let hashed_password = hash_password(&payload.password)?;

    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (email, username, password) VALUES ($1, $2, $3) RETURNING {}",
        USER_COLUMNS
    ))
    .bind(&email)
    .bind(&payload.username)
    .bind(hashed_password)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            match violated_constraint(&e).as_deref() {
                Some("users_username_key") => AppError::Conflict(format!(
                    "Username '{}' already exists",
                    payload.username
                )),
                _ => AppError::Conflict("Email is already registered".to_string()),
            }
        } else {
            tracing::error!("Failed to register user: {:?}", e);
            AppError::from(e)
        }
    })?;

    issue_session(&mut tx, &cookies, &config, &user).await?;
    tx.commit().await?;

    tracing::info!(user_id = user.id, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Registration successful",
            "user": user,
        })),
    ))
}

/// Authenticates a user and sets the session cookies.
pub async fn login(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE email = $1",
        USER_COLUMNS
    ))
    .bind(payload.email.trim().to_lowercase())
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Login DB error: {:?}", e);
        AppError::from(e)
    })?;

    // Same message for unknown email and wrong password.
    let user = user.ok_or(AppError::AuthError("Invalid email or password".to_string()))?;

    if !verify_password(&payload.password, &user.password)? {
        return Err(AppError::AuthError("Invalid email or password".to_string()));
    }

    if !user.is_active {
        return Err(AppError::Forbidden("Account is deactivated".to_string()));
    }

    let mut conn = pool.acquire().await?;
    issue_session(&mut conn, &cookies, &config, &user).await?;
    drop(conn);

    if let Err(e) = gamification::record_daily_login(&pool, user.id).await {
        tracing::warn!(user_id = user.id, "Failed to record daily login: {:?}", e);
    }

    Ok(Json(json!({
        "success": true,
        "message": "Login successful",
        "user": user,
    })))
}

#[derive(sqlx::FromRow)]
struct StoredToken {
    id: i64,
    user_id: i64,
    revoked: bool,
}

/// Rotates the refresh token: the presented one is revoked and a new pair is
/// issued. Presenting an already revoked token revokes the whole family.
pub async fn refresh(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    cookies: Cookies,
) -> Result<impl IntoResponse, AppError> {
    let result = rotate(&pool, &config, &cookies).await;
    if result.is_err() {
        clear_auth_cookies(&cookies, &config);
    }
    result?;

    Ok(Json(json!({ "success": true, "message": "Token refreshed" })))
}

async fn rotate(pool: &PgPool, config: &Config, cookies: &Cookies) -> Result<(), AppError> {
    let token = cookies
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_owned())
        .ok_or_else(|| AppError::AuthError("Refresh token missing".to_string()))?;

    let claims = verify_jwt(&token, &config.jwt_refresh_secret, TokenType::Refresh)?;

    let mut tx = pool.begin().await?;

    let stored = sqlx::query_as::<_, StoredToken>(
        r#"
        SELECT id, user_id, (revoked_at IS NOT NULL) AS revoked
        FROM refresh_tokens
        WHERE token_hash = $1 AND expires_at > NOW()
        FOR UPDATE
        "#,
    )
    .bind(hash_token(&token))
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::AuthError("Invalid refresh token".to_string()))?;

    if stored.user_id != claims.user_id()? {
        return Err(AppError::AuthError("Invalid refresh token".to_string()));
    }

    if stored.revoked {
        tracing::warn!(user_id = stored.user_id, "Revoked refresh token reused");
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(stored.user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        return Err(AppError::AuthError("Invalid refresh token".to_string()));
    }

    sqlx::query("UPDATE refresh_tokens SET revoked_at = NOW() WHERE id = $1")
        .bind(stored.id)
        .execute(&mut *tx)
        .await?;

    // Role may have changed since the token was issued.
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE id = $1 AND is_active",
        USER_COLUMNS
    ))
    .bind(stored.user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::AuthError("Account unavailable".to_string()))?;

    issue_session(&mut tx, cookies, config, &user).await?;
    tx.commit().await?;
    Ok(())
}

/// Revokes the presented refresh token and clears both cookies.
pub async fn logout(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    cookies: Cookies,
) -> Result<impl IntoResponse, AppError> {
    if let Some(token) = cookies.get(REFRESH_COOKIE).map(|c| c.value().to_owned()) {
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = NOW() WHERE token_hash = $1 AND revoked_at IS NULL",
        )
        .bind(hash_token(&token))
        .execute(&pool)
        .await?;
    }

    clear_auth_cookies(&cookies, &config);

    Ok(Json(json!({ "success": true, "message": "Logged out" })))
}

/// Current user's full profile.
pub async fn me(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user = find_user(&pool, claims.user_id()?).await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

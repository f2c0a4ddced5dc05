// src/handlers/users.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::{AppError, is_unique_violation},
    handlers::{activities::achievement_statuses, auth::find_user},
    models::user::{
        ChangePasswordRequest, EnrolledCourse, PublicProfile, USER_COLUMNS, UpdateProfileRequest,
        User,
    },
    services::gamification::streak_as_of,
    utils::{
        hash::{hash_password, verify_password},
        html::strip_tags,
        jwt::Claims,
    },
};

/// Courses the current user is enrolled in, with progress.
pub async fn my_courses(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let courses = sqlx::query_as::<_, EnrolledCourse>(
        r#"
        SELECT
            c.id AS course_id, c.title, c.slug, c.thumbnail_url,
            e.enrolled_at, e.completed_at,
            (SELECT COUNT(*) FROM lessons l JOIN units u ON l.unit_id = u.id
                WHERE u.course_id = c.id) AS total_lessons,
            (SELECT COUNT(*) FROM lesson_progress lp
                JOIN lessons l ON lp.lesson_id = l.id
                JOIN units u ON l.unit_id = u.id
                WHERE u.course_id = c.id AND lp.user_id = e.user_id) AS completed_lessons
        FROM enrollments e
        JOIN courses c ON e.course_id = c.id
        WHERE e.user_id = $1
        ORDER BY e.enrolled_at DESC
        "#,
    )
    .bind(claims.user_id()?)
    .fetch_all(&pool)
    .await?;

    let courses: Vec<serde_json::Value> = courses
        .into_iter()
        .map(|c| {
            let progress = c.progress();
            let mut value = serde_json::to_value(&c).unwrap_or_default();
            value["progress"] = json!(progress);
            value
        })
        .collect();

    Ok(Json(json!({ "success": true, "courses": courses })))
}

/// Updates the current user's username, bio or avatar.
pub async fn update_me(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;

    if payload.username.is_none() && payload.bio.is_none() && payload.avatar_url.is_none() {
        let user = find_user(&pool, user_id).await?;
        return Ok(Json(json!({ "success": true, "user": user })));
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET ");
    let mut separated = builder.separated(", ");

    if let Some(username) = &payload.username {
        separated.push("username = ");
        separated.push_bind_unseparated(username.clone());
    }

    if let Some(bio) = payload.bio {
        separated.push("bio = ");
        separated.push_bind_unseparated(strip_tags(&bio));
    }

    if let Some(avatar_url) = payload.avatar_url {
        separated.push("avatar_url = ");
        separated.push_bind_unseparated(avatar_url);
    }

    separated.push("updated_at = NOW()");
    builder.push(" WHERE id = ");
    builder.push_bind(user_id);
    builder.push(format!(" RETURNING {}", USER_COLUMNS));

    let user = builder
        .build_query_as::<User>()
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!(
                    "Username '{}' already exists",
                    payload.username.clone().unwrap_or_default()
                ))
            } else {
                tracing::error!("Failed to update profile: {:?}", e);
                AppError::from(e)
            }
        })?
        .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(Json(json!({ "success": true, "user": user })))
}

/// Changes the password and signs out every other session.
pub async fn change_password(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user = find_user(&pool, claims.user_id()?).await?;

    if !verify_password(&payload.current_password, &user.password)? {
        return Err(AppError::AuthError("Current password is incorrect".to_string()));
    }

    let hashed = hash_password(&payload.new_password)?;

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE users SET password = $1, updated_at = NOW() WHERE id = $2")
        .bind(hashed)
        .bind(user.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "UPDATE refresh_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
    )
    .bind(user.id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Json(json!({ "success": true, "message": "Password updated" })))
}

/// Public profile of any active user, with unlocked achievements.
pub async fn get_profile(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut profile = sqlx::query_as::<_, PublicProfile>(
        r#"
        SELECT id, username, role, bio, avatar_url, xp, level,
               current_streak, longest_streak, last_active_date, created_at
        FROM users
        WHERE id = $1 AND is_active
        "#,
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;
    profile.current_streak = streak_as_of(
        profile.current_streak,
        profile.last_active_date,
        Utc::now().date_naive(),
    );

    let achievements: Vec<_> = achievement_statuses(&pool, id)
        .await?
        .into_iter()
        .filter(|a| a.unlocked_at.is_some())
        .collect();

    Ok(Json(json!({
        "success": true,
        "user": profile,
        "achievements": achievements,
    })))
}

// src/handlers/activities.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use chrono::{NaiveDate, Utc};
use serde_json::json;
use sqlx::{FromRow, PgPool};

use crate::{
    error::AppError,
    models::{
        activity::{
            Activity, AchievementStatus, GamificationStats, LeaderboardEntry, LeaderboardParams,
        },
        pagination::Pagination,
    },
    services::gamification::{Achievement, level_progress, streak_as_of},
    utils::jwt::Claims,
};

const DEFAULT_LEADERBOARD_SIZE: i64 = 10;
const MAX_LEADERBOARD_SIZE: i64 = 50;

/// Every achievement, with the unlock time for the ones the user has.
pub async fn achievement_statuses(
    pool: &PgPool,
    user_id: i64,
) -> Result<Vec<AchievementStatus>, AppError> {
    let unlocked: HashMap<String, chrono::DateTime<chrono::Utc>> = sqlx::query_as(
        "SELECT code, unlocked_at FROM user_achievements WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .collect();

    Ok(Achievement::ALL
        .iter()
        .map(|a| AchievementStatus {
            code: a.code(),
            title: a.title(),
            description: a.description(),
            unlocked_at: unlocked.get(a.code()).copied(),
        })
        .collect())
}

/// The current user's points ledger, newest first.
pub async fn my_activities(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let activities = sqlx::query_as::<_, Activity>(
        r#"
        SELECT id, user_id, kind, points, reference_id, description, created_at
        FROM activities
        WHERE user_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(claims.user_id()?)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "activities": activities,
        "page": page.page(),
        "per_page": page.limit(),
    })))
}

#[derive(FromRow)]
struct ProgressRow {
    xp: i64,
    level: i32,
    current_streak: i32,
    longest_streak: i32,
    last_active_date: Option<NaiveDate>,
}

/// Xp, level progress, streaks and achievements of the current user.
pub async fn my_stats(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let row = sqlx::query_as::<_, ProgressRow>(
        "SELECT xp, level, current_streak, longest_streak, last_active_date FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    let (xp_into_level, xp_for_next_level) = level_progress(row.xp);

    let stats = GamificationStats {
        xp: row.xp,
        level: row.level,
        xp_into_level,
        xp_for_next_level,
        current_streak: streak_as_of(row.current_streak, row.last_active_date, Utc::now().date_naive()),
        longest_streak: row.longest_streak,
        last_active_date: row.last_active_date,
        achievements: achievement_statuses(&pool, user_id).await?,
    };

    Ok(Json(json!({ "success": true, "stats": stats })))
}

/// Top active users by xp.
pub async fn leaderboard(
    State(pool): State<PgPool>,
    Query(params): Query<LeaderboardParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_SIZE)
        .clamp(1, MAX_LEADERBOARD_SIZE);

    let mut entries = sqlx::query_as::<_, LeaderboardEntry>(
        r#"
        SELECT id AS user_id, username, avatar_url, xp, level, current_streak, last_active_date
        FROM users
        WHERE is_active
        ORDER BY xp DESC, id ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(&pool)
    .await?;

    let today = Utc::now().date_naive();
    for entry in &mut entries {
        entry.current_streak = streak_as_of(entry.current_streak, entry.last_active_date, today);
    }

    Ok(Json(json!({ "success": true, "leaderboard": entries })))
}

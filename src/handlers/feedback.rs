// src/handlers/feedback.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::feedback::{Feedback, FeedbackResponse, RatingSummary, SubmitFeedbackRequest},
    services::gamification::{self, ActivityKind},
    utils::{access::is_enrolled, html::strip_tags, jwt::Claims},
};

/// Rates a course, or updates the caller's existing rating.
/// Only the first rating of a course earns points.
pub async fn submit_feedback(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
    Json(payload): Json<SubmitFeedbackRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;

    if !is_enrolled(&pool, user_id, course_id).await? {
        return Err(AppError::Forbidden(
            "Only enrolled students can rate a course".to_string(),
        ));
    }

    let comment = payload
        .comment
        .as_deref()
        .map(strip_tags)
        .filter(|c| !c.is_empty());

    let mut tx = pool.begin().await?;

    let existed: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM feedback WHERE user_id = $1 AND course_id = $2)",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(&mut *tx)
    .await?;

    let feedback = sqlx::query_as::<_, Feedback>(
        r#"
        INSERT INTO feedback (user_id, course_id, rating, comment)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, course_id) DO UPDATE
        SET rating = EXCLUDED.rating, comment = EXCLUDED.comment, updated_at = NOW()
        RETURNING user_id, course_id, rating, comment, created_at, updated_at
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .bind(payload.rating)
    .bind(comment)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to save feedback: {:?}", e);
        AppError::from(e)
    })?;

    // Deleting and rating again must not earn the points twice.
    let reward = gamification::award_once(
        &mut *tx,
        user_id,
        ActivityKind::FeedbackGiven,
        course_id,
        "Rated a course",
    )
    .await?;
    let (points_awarded, new_achievements) = match reward {
        Some(outcome) => (outcome.points, outcome.new_achievements),
        None => (0, Vec::new()),
    };

    tx.commit().await?;

    let status = if !existed {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(json!({
            "success": true,
            "feedback": feedback,
            "points_awarded": points_awarded,
            "new_achievements": new_achievements,
        })),
    ))
}

/// All ratings of a course with the aggregate summary.
pub async fn list_feedback(
    State(pool): State<PgPool>,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let feedback = sqlx::query_as::<_, FeedbackResponse>(
        r#"
        SELECT f.user_id, u.username, f.rating, f.comment, f.created_at, f.updated_at
        FROM feedback f
        JOIN users u ON f.user_id = u.id
        WHERE f.course_id = $1
        ORDER BY f.updated_at DESC
        "#,
    )
    .bind(course_id)
    .fetch_all(&pool)
    .await?;

    let summary = RatingSummary::from_ratings(feedback.iter().map(|f| f.rating));

    Ok(Json(json!({
        "success": true,
        "feedback": feedback,
        "summary": summary,
    })))
}

/// Removes the caller's rating of a course.
pub async fn delete_feedback(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM feedback WHERE user_id = $1 AND course_id = $2")
        .bind(claims.user_id()?)
        .bind(course_id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Feedback not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

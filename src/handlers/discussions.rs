// src/handlers/discussions.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        discussion::{
            CreateDiscussionRequest, CreateReplyRequest, Discussion, DiscussionSummary,
            DiscussionThread, ReplyResponse, UpdateDiscussionRequest,
        },
        pagination::Pagination,
    },
    services::gamification::{self, ActivityKind},
    utils::{
        access::{course_of_discussion, course_owner, ensure_course_member},
        html::strip_tags,
        jwt::Claims,
    },
};

const DISCUSSION_COLUMNS: &str = "id, course_id, user_id, title, body, replies_count, is_pinned, \
     created_at, updated_at, deleted_at";

const SUMMARY_SELECT: &str = r#"
    SELECT d.id, d.course_id, d.user_id, u.username, d.title, d.body,
           d.replies_count, d.is_pinned, d.created_at, d.updated_at
    FROM discussions d
    JOIN users u ON d.user_id = u.id
"#;

async fn find_discussion(pool: &PgPool, id: i64) -> Result<Discussion, AppError> {
    sqlx::query_as::<_, Discussion>(&format!(
        "SELECT {} FROM discussions WHERE id = $1 AND deleted_at IS NULL",
        DISCUSSION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Discussion not found".to_string()))
}

/// Discussions of a course, pinned first, then newest.
pub async fn list_discussions(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    ensure_course_member(&pool, &claims, course_id).await?;

    let discussions = sqlx::query_as::<_, DiscussionSummary>(&format!(
        r#"
        {}
        WHERE d.course_id = $1 AND d.deleted_at IS NULL
        ORDER BY d.is_pinned DESC, d.created_at DESC, d.id DESC
        LIMIT $2 OFFSET $3
        "#,
        SUMMARY_SELECT
    ))
    .bind(course_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list discussions: {:?}", e);
        AppError::from(e)
    })?;

    Ok(Json(json!({
        "success": true,
        "discussions": discussions,
        "page": page.page(),
        "per_page": page.limit(),
    })))
}

/// Starts a discussion in a course.
pub async fn create_discussion(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
    Json(payload): Json<CreateDiscussionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    ensure_course_member(&pool, &claims, course_id).await?;

    let user_id = claims.user_id()?;
    let title = strip_tags(&payload.title);
    let body = strip_tags(&payload.body);
    if title.is_empty() || body.is_empty() {
        return Err(AppError::BadRequest(
            "Title and body cannot be empty".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let discussion = sqlx::query_as::<_, Discussion>(&format!(
        "INSERT INTO discussions (course_id, user_id, title, body) VALUES ($1, $2, $3, $4) RETURNING {}",
        DISCUSSION_COLUMNS
    ))
    .bind(course_id)
    .bind(user_id)
    .bind(title)
    .bind(body)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create discussion: {:?}", e);
        AppError::from(e)
    })?;

    let outcome = gamification::award(
        &mut *tx,
        user_id,
        ActivityKind::DiscussionCreated,
        Some(discussion.id),
        "Started a discussion",
    )
    .await?;

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "discussion": discussion,
            "points_awarded": outcome.points,
            "new_achievements": outcome.new_achievements,
        })),
    ))
}

/// A discussion with its replies, oldest reply first.
pub async fn get_discussion(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = course_of_discussion(&pool, id).await?;
    ensure_course_member(&pool, &claims, course_id).await?;

    let discussion = sqlx::query_as::<_, DiscussionSummary>(&format!(
        "{} WHERE d.id = $1 AND d.deleted_at IS NULL",
        SUMMARY_SELECT
    ))
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Discussion not found".to_string()))?;

    let replies = sqlx::query_as::<_, ReplyResponse>(
        r#"
        SELECT r.id, r.discussion_id, r.user_id, u.username, r.body, r.created_at
        FROM discussion_replies r
        JOIN users u ON r.user_id = u.id
        WHERE r.discussion_id = $1 AND r.deleted_at IS NULL
        ORDER BY r.created_at ASC, r.id ASC
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "discussion": DiscussionThread { discussion, replies },
    })))
}

/// Edits a discussion. Author only.
pub async fn update_discussion(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateDiscussionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let existing = find_discussion(&pool, id).await?;

    if existing.user_id != claims.user_id()? {
        return Err(AppError::Forbidden(
            "Only the author can edit this discussion".to_string(),
        ));
    }

    let discussion = sqlx::query_as::<_, Discussion>(&format!(
        r#"
        UPDATE discussions
        SET title = COALESCE($1, title), body = COALESCE($2, body), updated_at = NOW()
        WHERE id = $3
        RETURNING {}
        "#,
        DISCUSSION_COLUMNS
    ))
    .bind(payload.title.as_deref().map(strip_tags))
    .bind(payload.body.as_deref().map(strip_tags))
    .bind(id)
    .fetch_one(&pool)
    .await?;

    Ok(Json(json!({ "success": true, "discussion": discussion })))
}

/// Soft-deletes a discussion. Author, course owner or admin.
pub async fn delete_discussion(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let discussion = find_discussion(&pool, id).await?;
    let user_id = claims.user_id()?;

    let allowed = discussion.user_id == user_id
        || claims.is_admin()
        || course_owner(&pool, discussion.course_id).await? == user_id;
    if !allowed {
        return Err(AppError::Forbidden(
            "You cannot delete this discussion".to_string(),
        ));
    }

    sqlx::query("UPDATE discussions SET deleted_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    tracing::info!(discussion_id = id, deleted_by = user_id, "Discussion deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Replies to a discussion and bumps its reply counter atomically.
pub async fn create_reply(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<CreateReplyRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let course_id = course_of_discussion(&pool, id).await?;
    ensure_course_member(&pool, &claims, course_id).await?;

    let user_id = claims.user_id()?;
    let body = strip_tags(&payload.body);
    if body.is_empty() {
        return Err(AppError::BadRequest("Reply cannot be empty".to_string()));
    }

    let mut tx = pool.begin().await?;

    let reply_id: i64 = sqlx::query_scalar(
        "INSERT INTO discussion_replies (discussion_id, user_id, body) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(id)
    .bind(user_id)
    .bind(&body)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create reply: {:?}", e);
        AppError::from(e)
    })?;

    sqlx::query("UPDATE discussions SET replies_count = replies_count + 1 WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let outcome = gamification::award(
        &mut *tx,
        user_id,
        ActivityKind::ReplyCreated,
        Some(reply_id),
        "Replied to a discussion",
    )
    .await?;

    let reply = sqlx::query_as::<_, ReplyResponse>(
        r#"
        SELECT r.id, r.discussion_id, r.user_id, u.username, r.body, r.created_at
        FROM discussion_replies r
        JOIN users u ON r.user_id = u.id
        WHERE r.id = $1
        "#,
    )
    .bind(reply_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "reply": reply,
            "points_awarded": outcome.points,
            "new_achievements": outcome.new_achievements,
        })),
    ))
}

#[derive(sqlx::FromRow)]
struct ReplyOwner {
    discussion_id: i64,
    user_id: i64,
}

/// Soft-deletes a reply. Author or admin.
pub async fn delete_reply(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let reply = sqlx::query_as::<_, ReplyOwner>(
        "SELECT discussion_id, user_id FROM discussion_replies WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Reply not found".to_string()))?;

    if reply.user_id != claims.user_id()? && !claims.is_admin() {
        return Err(AppError::Forbidden(
            "You cannot delete this reply".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let deleted = sqlx::query(
        "UPDATE discussion_replies SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    // A concurrent delete already decremented the counter.
    if deleted.rows_affected() == 1 {
        sqlx::query(
            "UPDATE discussions SET replies_count = GREATEST(replies_count - 1, 0) WHERE id = $1",
        )
        .bind(reply.discussion_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Toggles the pinned flag. Course owner or admin.
pub async fn toggle_pin(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let discussion = find_discussion(&pool, id).await?;

    if !claims.is_admin() && course_owner(&pool, discussion.course_id).await? != claims.user_id()? {
        return Err(AppError::Forbidden(
            "Only the course instructor can pin discussions".to_string(),
        ));
    }

    let is_pinned: bool = sqlx::query_scalar(
        "UPDATE discussions SET is_pinned = NOT is_pinned WHERE id = $1 RETURNING is_pinned",
    )
    .bind(id)
    .fetch_one(&pool)
    .await?;

    Ok(Json(json!({ "success": true, "is_pinned": is_pinned })))
}

// src/handlers/curriculum.rs

//! Units and lessons of a course, and lesson completion.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::AppError,
    models::course::{
        CreateLessonRequest, CreateUnitRequest, Lesson, Unit, UpdateLessonRequest,
        UpdateUnitRequest,
    },
    services::gamification::{self, ActivityKind},
    utils::{
        access::{
            course_of_lesson, course_of_unit, ensure_course_manager, ensure_course_member,
            is_enrolled,
        },
        html::{clean_html, strip_tags},
        jwt::Claims,
    },
};

const UNIT_COLUMNS: &str = "id, course_id, title, description, position";
const LESSON_COLUMNS: &str = "id, unit_id, title, content, video_url, duration_minutes, position";

/// Adds a unit at the end of the course (or at `position`).
pub async fn create_unit(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
    Json(payload): Json<CreateUnitRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    let unit = sqlx::query_as::<_, Unit>(&format!(
        r#"
        INSERT INTO units (course_id, title, description, position)
        VALUES ($1, $2, $3,
            COALESCE($4, (SELECT COALESCE(MAX(position) + 1, 0) FROM units WHERE course_id = $1)))
        RETURNING {}
        "#,
        UNIT_COLUMNS
    ))
    .bind(course_id)
    .bind(payload.title.trim())
    .bind(payload.description.as_deref().map(strip_tags))
    .bind(payload.position)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create unit: {:?}", e);
        AppError::from(e)
    })?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "unit": unit })),
    ))
}

pub async fn update_unit(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateUnitRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let course_id = course_of_unit(&pool, id).await?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    let unit = sqlx::query_as::<_, Unit>(&format!(
        r#"
        UPDATE units
        SET title = COALESCE($1, title),
            description = COALESCE($2, description),
            position = COALESCE($3, position)
        WHERE id = $4
        RETURNING {}
        "#,
        UNIT_COLUMNS
    ))
    .bind(payload.title.as_deref().map(str::trim))
    .bind(payload.description.as_deref().map(strip_tags))
    .bind(payload.position)
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Unit not found".to_string()))?;

    Ok(Json(json!({ "success": true, "unit": unit })))
}

/// Deletes a unit with its lessons and quizzes.
pub async fn delete_unit(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = course_of_unit(&pool, id).await?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    sqlx::query("DELETE FROM units WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_lesson(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(unit_id): Path<i64>,
    Json(payload): Json<CreateLessonRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let course_id = course_of_unit(&pool, unit_id).await?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    let lesson = sqlx::query_as::<_, Lesson>(&format!(
        r#"
        INSERT INTO lessons (unit_id, title, content, video_url, duration_minutes, position)
        VALUES ($1, $2, $3, $4, $5,
            COALESCE($6, (SELECT COALESCE(MAX(position) + 1, 0) FROM lessons WHERE unit_id = $1)))
        RETURNING {}
        "#,
        LESSON_COLUMNS
    ))
    .bind(unit_id)
    .bind(payload.title.trim())
    .bind(clean_html(&payload.content))
    .bind(&payload.video_url)
    .bind(payload.duration_minutes)
    .bind(payload.position)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create lesson: {:?}", e);
        AppError::from(e)
    })?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "lesson": lesson })),
    ))
}

/// Full lesson content. Enrolled students, the owner and admins only.
pub async fn get_lesson(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = course_of_lesson(&pool, id).await?;
    ensure_course_member(&pool, &claims, course_id).await?;

    let lesson = sqlx::query_as::<_, Lesson>(&format!(
        "SELECT {} FROM lessons WHERE id = $1",
        LESSON_COLUMNS
    ))
    .bind(id)
    .fetch_one(&pool)
    .await?;

    let completed: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM lesson_progress WHERE user_id = $1 AND lesson_id = $2)",
    )
    .bind(claims.user_id()?)
    .bind(id)
    .fetch_one(&pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "lesson": lesson,
        "course_id": course_id,
        "completed": completed,
    })))
}

pub async fn update_lesson(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateLessonRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let course_id = course_of_lesson(&pool, id).await?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE lessons SET ");
    let mut separated = builder.separated(", ");
    // Keeps the statement valid when nothing else changes.
    separated.push("id = id");

    if let Some(title) = payload.title {
        separated.push("title = ");
        separated.push_bind_unseparated(title.trim().to_string());
    }

    if let Some(content) = payload.content {
        separated.push("content = ");
        separated.push_bind_unseparated(clean_html(&content));
    }

    if let Some(video_url) = payload.video_url {
        separated.push("video_url = ");
        separated.push_bind_unseparated(video_url);
    }

    if let Some(duration) = payload.duration_minutes {
        separated.push("duration_minutes = ");
        separated.push_bind_unseparated(duration);
    }

    if let Some(position) = payload.position {
        separated.push("position = ");
        separated.push_bind_unseparated(position);
    }

    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(format!(" RETURNING {}", LESSON_COLUMNS));

    let lesson = builder
        .build_query_as::<Lesson>()
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Lesson not found".to_string()))?;

    Ok(Json(json!({ "success": true, "lesson": lesson })))
}

pub async fn delete_lesson(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = course_of_lesson(&pool, id).await?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    sqlx::query("DELETE FROM lessons WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Marks a lesson as completed for the current (enrolled) user.
///
/// Completing a lesson twice is a no-op. Completing the last lesson of a
/// course marks the enrollment completed and awards the course bonus.
pub async fn complete_lesson(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let course_id = course_of_lesson(&pool, id).await?;

    if !is_enrolled(&pool, user_id, course_id).await? {
        return Err(AppError::Forbidden(
            "You must be enrolled in this course".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        "INSERT INTO lesson_progress (user_id, lesson_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(user_id)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        tx.commit().await?;
        return Ok(Json(json!({
            "success": true,
            "message": "Lesson already completed",
            "points_awarded": 0,
            "course_completed": false,
        })));
    }

    let mut outcome = gamification::award(
        &mut *tx,
        user_id,
        ActivityKind::LessonCompleted,
        Some(id),
        "Completed a lesson",
    )
    .await?;
    let mut points_awarded = outcome.points;
    let mut new_achievements = std::mem::take(&mut outcome.new_achievements);
    let mut leveled_up = outcome.leveled_up;

    let remaining: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM lessons l
        JOIN units u ON l.unit_id = u.id
        WHERE u.course_id = $1
          AND NOT EXISTS (
              SELECT 1 FROM lesson_progress lp WHERE lp.lesson_id = l.id AND lp.user_id = $2
          )
        "#,
    )
    .bind(course_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    let mut course_completed = false;
    if remaining == 0 {
        let marked = sqlx::query(
            r#"
            UPDATE enrollments SET completed_at = NOW()
            WHERE user_id = $1 AND course_id = $2 AND completed_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .execute(&mut *tx)
        .await?;

        if marked.rows_affected() == 1 {
            course_completed = true;
            let mut course_outcome = gamification::award(
                &mut *tx,
                user_id,
                ActivityKind::CourseCompleted,
                Some(course_id),
                "Completed a course",
            )
            .await?;
            points_awarded += course_outcome.points;
            new_achievements.extend(std::mem::take(&mut course_outcome.new_achievements));
            leveled_up |= course_outcome.leveled_up;
            outcome = course_outcome;
        }
    }

    tx.commit().await?;

    if course_completed {
        tracing::info!(user_id, course_id, "Course completed");
    }

    Ok(Json(json!({
        "success": true,
        "message": "Lesson completed",
        "points_awarded": points_awarded,
        "course_completed": course_completed,
        "xp": outcome.xp,
        "level": outcome.level,
        "leveled_up": leveled_up,
        "current_streak": outcome.current_streak,
        "new_achievements": new_achievements,
    })))
}

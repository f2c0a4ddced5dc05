// src/utils/access.rs

//! Course-scoped authorization. A course belongs to its instructor; admins
//! manage every course; students reach course content through enrollment.

use sqlx::PgPool;

use crate::{error::AppError, utils::jwt::Claims};

/// Returns the owner of a course, or 404.
pub async fn course_owner(pool: &PgPool, course_id: i64) -> Result<i64, AppError> {
    let owner: Option<i64> = sqlx::query_scalar("SELECT instructor_id FROM courses WHERE id = $1")
        .bind(course_id)
        .fetch_optional(pool)
        .await?;

    owner.ok_or(AppError::NotFound("Course not found".to_string()))
}

pub async fn is_enrolled(pool: &PgPool, user_id: i64, course_id: i64) -> Result<bool, AppError> {
    let enrolled: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM enrollments WHERE user_id = $1 AND course_id = $2)",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    Ok(enrolled)
}

/// Owner or admin, else 403.
pub async fn ensure_course_manager(
    pool: &PgPool,
    claims: &Claims,
    course_id: i64,
) -> Result<(), AppError> {
    let owner = course_owner(pool, course_id).await?;
    if claims.is_admin() || owner == claims.user_id()? {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Only the course instructor can do this".to_string(),
    ))
}

/// Enrolled student, owner or admin, else 403.
pub async fn ensure_course_member(
    pool: &PgPool,
    claims: &Claims,
    course_id: i64,
) -> Result<(), AppError> {
    let owner = course_owner(pool, course_id).await?;
    let user_id = claims.user_id()?;

    if claims.is_admin() || owner == user_id || is_enrolled(pool, user_id, course_id).await? {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "You must be enrolled in this course".to_string(),
    ))
}

pub async fn course_of_unit(pool: &PgPool, unit_id: i64) -> Result<i64, AppError> {
    sqlx::query_scalar("SELECT course_id FROM units WHERE id = $1")
        .bind(unit_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Unit not found".to_string()))
}

pub async fn course_of_lesson(pool: &PgPool, lesson_id: i64) -> Result<i64, AppError> {
    sqlx::query_scalar(
        "SELECT u.course_id FROM lessons l JOIN units u ON l.unit_id = u.id WHERE l.id = $1",
    )
    .bind(lesson_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Lesson not found".to_string()))
}

pub async fn course_of_quiz(pool: &PgPool, quiz_id: i64) -> Result<i64, AppError> {
    sqlx::query_scalar(
        "SELECT u.course_id FROM quizzes q JOIN units u ON q.unit_id = u.id WHERE q.id = $1",
    )
    .bind(quiz_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Quiz not found".to_string()))
}

pub async fn course_of_question(pool: &PgPool, question_id: i64) -> Result<i64, AppError> {
    sqlx::query_scalar(
        r#"
        SELECT u.course_id
        FROM questions qs
        JOIN quizzes q ON qs.quiz_id = q.id
        JOIN units u ON q.unit_id = u.id
        WHERE qs.id = $1
        "#,
    )
    .bind(question_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Question not found".to_string()))
}

pub async fn course_of_discussion(pool: &PgPool, discussion_id: i64) -> Result<i64, AppError> {
    sqlx::query_scalar("SELECT course_id FROM discussions WHERE id = $1 AND deleted_at IS NULL")
        .bind(discussion_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Discussion not found".to_string()))
}

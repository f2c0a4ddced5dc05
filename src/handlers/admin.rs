// src/handlers/admin.rs

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::{
    error::AppError,
    handlers::payments::release_course_payments,
    models::{
        course::{COURSE_COLUMNS, Course},
        pagination::{Pagination, contains_pattern},
        payment::{PAYMENT_COLUMNS, Payment, PaymentListParams, STATUS_COMPLETED},
        user::{USER_COLUMNS, User, is_valid_role},
    },
    utils::jwt::Claims,
};

/// Query parameters for the user listing.
#[derive(Debug, Deserialize)]
pub struct UserListParams {
    pub role: Option<String>,
    /// Matches username or email.
    pub q: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub is_published: bool,
}

fn push_user_filters(builder: &mut QueryBuilder<'_, Postgres>, params: &UserListParams) {
    builder.push(" WHERE TRUE");

    if let Some(role) = &params.role {
        builder.push(" AND role = ");
        builder.push_bind(role.clone());
    }

    if let Some(q) = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = contains_pattern(q);
        builder.push(" AND (username ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" ESCAPE '\\' OR email ILIKE ");
        builder.push_bind(pattern);
        builder.push(" ESCAPE '\\')");
    }
}

/// Lists users, filtered by role and a search term.
/// Admin only.
pub async fn list_users(
    State(pool): State<PgPool>,
    Query(params): Query<UserListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = Pagination::new(params.page, params.per_page);

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT {} FROM users", USER_COLUMNS));
    push_user_filters(&mut builder, &params);
    builder.push(" ORDER BY id DESC LIMIT ");
    builder.push_bind(page.limit());
    builder.push(" OFFSET ");
    builder.push_bind(page.offset());

    let users: Vec<User> = builder
        .build_query_as()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list users: {:?}", e);
            AppError::from(e)
        })?;

    let mut count_builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM users");
    push_user_filters(&mut count_builder, &params);
    let total: i64 = count_builder.build_query_scalar().fetch_one(&pool).await?;

    Ok(Json(json!({
        "success": true,
        "users": users,
        "page": page.page(),
        "per_page": page.limit(),
        "total": total,
    })))
}

/// Changes a user's role.
/// Admin only. Takes effect on the user's next token refresh.
pub async fn update_role(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !is_valid_role(&payload.role) {
        return Err(AppError::BadRequest(format!(
            "Unknown role '{}'",
            payload.role
        )));
    }

    if id == claims.user_id()? {
        return Err(AppError::BadRequest("Cannot change your own role".to_string()));
    }

    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET role = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
        USER_COLUMNS
    ))
    .bind(&payload.role)
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    tracing::info!(user_id = id, role = %payload.role, "User role changed");

    Ok(Json(json!({ "success": true, "user": user })))
}

/// Activates or deactivates a user.
/// Deactivation signs the user out everywhere.
pub async fn update_status(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    if id == claims.user_id()? {
        return Err(AppError::BadRequest(
            "Cannot change your own status".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET is_active = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
        USER_COLUMNS
    ))
    .bind(payload.is_active)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    if !payload.is_active {
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(user_id = id, is_active = payload.is_active, "User status changed");

    Ok(Json(json!({ "success": true, "user": user })))
}

/// Deletes a user by ID.
/// Admin only. Prevents deleting self.
pub async fn delete_user(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if id == claims.user_id()? {
        return Err(AppError::BadRequest("Cannot delete yourself".to_string()));
    }

    let mut tx = pool.begin().await?;

    let owned: Vec<i64> = sqlx::query_scalar("SELECT id FROM courses WHERE instructor_id = $1")
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
    if !owned.is_empty() {
        release_course_payments(&mut *tx, &owned).await?;
    }

    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete user: {:?}", e);
            AppError::from(e)
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    tx.commit().await?;

    tracing::info!(user_id = id, "User deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[derive(sqlx::FromRow)]
struct Totals {
    courses: i64,
    published_courses: i64,
    enrollments: i64,
    completed_enrollments: i64,
    completed_payments: i64,
    revenue_cents: i64,
}

/// Platform totals.
pub async fn stats(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let users_by_role: HashMap<String, i64> =
        sqlx::query_as::<_, (String, i64)>("SELECT role, COUNT(*) FROM users GROUP BY role")
            .fetch_all(&pool)
            .await?
            .into_iter()
            .collect();

    let totals = sqlx::query_as::<_, Totals>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM courses) AS courses,
            (SELECT COUNT(*) FROM courses WHERE is_published) AS published_courses,
            (SELECT COUNT(*) FROM enrollments) AS enrollments,
            (SELECT COUNT(*) FROM enrollments WHERE completed_at IS NOT NULL) AS completed_enrollments,
            (SELECT COUNT(*) FROM payments WHERE status = $1) AS completed_payments,
            (SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM payments WHERE status = $1) AS revenue_cents
        "#,
    )
    .bind(STATUS_COMPLETED)
    .fetch_one(&pool)
    .await?;

    let total_users: i64 = users_by_role.values().sum();

    Ok(Json(json!({
        "success": true,
        "stats": {
            "users": total_users,
            "users_by_role": users_by_role,
            "courses": totals.courses,
            "published_courses": totals.published_courses,
            "enrollments": totals.enrollments,
            "completed_enrollments": totals.completed_enrollments,
            "completed_payments": totals.completed_payments,
            "revenue_cents": totals.revenue_cents,
        }
    })))
}

/// Every payment, optionally filtered by status.
pub async fn list_payments(
    State(pool): State<PgPool>,
    Query(params): Query<PaymentListParams>,
) -> Result<impl IntoResponse, AppError> {
    let payments = sqlx::query_as::<_, Payment>(&format!(
        "SELECT {} FROM payments WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_at DESC",
        PAYMENT_COLUMNS
    ))
    .bind(params.status)
    .fetch_all(&pool)
    .await?;

    Ok(Json(json!({ "success": true, "payments": payments })))
}

/// Publishes or unpublishes any course.
pub async fn set_published(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<PublishRequest>,
) -> Result<impl IntoResponse, AppError> {
    let course = sqlx::query_as::<_, Course>(&format!(
        "UPDATE courses SET is_published = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
        COURSE_COLUMNS
    ))
    .bind(payload.is_published)
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Course not found".to_string()))?;

    Ok(Json(json!({ "success": true, "course": course })))
}

/// Moderation delete: removes a discussion and its replies for good.
pub async fn delete_discussion(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM discussions WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Discussion not found".to_string()));
    }

    tracing::info!(discussion_id = id, "Discussion removed by moderator");

    Ok(StatusCode::NO_CONTENT)
}

// src/handlers/courses.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::{AppError, is_unique_violation},
    handlers::payments::release_course_payments,
    models::{
        course::{
            COURSE_COLUMNS, Course, CourseDetail, CourseListParams, CourseSummary,
            CreateCourseRequest, LessonOutline, QuizOutline, Unit, UnitOutline,
            UpdateCourseRequest, slugify,
        },
        pagination::{Pagination, contains_pattern},
        payment::STATUS_COMPLETED,
    },
    utils::{
        access::{ensure_course_manager, is_enrolled},
        html::clean_html,
        jwt::{Claims, OptionalClaims},
    },
};

const SUMMARY_SELECT: &str = r#"
    SELECT
        c.id, c.instructor_id, u.username AS instructor_name, c.title, c.slug,
        c.category, c.level, c.price_cents, c.currency, c.thumbnail_url, c.is_published,
        (SELECT AVG(f.rating)::FLOAT8 FROM feedback f WHERE f.course_id = c.id) AS average_rating,
        (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS enrollment_count,
        c.created_at
    FROM courses c
    JOIN users u ON c.instructor_id = u.id
"#;

pub async fn find_course(pool: &PgPool, id: i64) -> Result<Course, AppError> {
    sqlx::query_as::<_, Course>(&format!("SELECT {} FROM courses WHERE id = $1", COURSE_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Course not found".to_string()))
}

/// Appends the catalog filters shared by the page query and the count query.
fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, params: &CourseListParams) {
    builder.push(" WHERE c.is_published = TRUE");

    if let Some(category) = &params.category {
        builder.push(" AND c.category = ");
        builder.push_bind(category.clone());
    }

    if let Some(level) = &params.level {
        builder.push(" AND c.level = ");
        builder.push_bind(level.clone());
    }

    if let Some(q) = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        builder.push(" AND c.title ILIKE ");
        builder.push_bind(contains_pattern(q));
        builder.push(" ESCAPE '\\'");
    }

    if let Some(instructor_id) = params.instructor_id {
        builder.push(" AND c.instructor_id = ");
        builder.push_bind(instructor_id);
    }
}

/// Lists published courses, filtered and paginated.
pub async fn list_courses(
    State(pool): State<PgPool>,
    Query(params): Query<CourseListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = Pagination::new(params.page, params.per_page);

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(SUMMARY_SELECT);
    push_filters(&mut builder, &params);
    builder.push(" ORDER BY c.created_at DESC LIMIT ");
    builder.push_bind(page.limit());
    builder.push(" OFFSET ");
    builder.push_bind(page.offset());

    let courses: Vec<CourseSummary> = builder
        .build_query_as()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list courses: {:?}", e);
            AppError::from(e)
        })?;

    let mut count_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM courses c");
    push_filters(&mut count_builder, &params);
    let total: i64 = count_builder.build_query_scalar().fetch_one(&pool).await?;

    Ok(Json(json!({
        "success": true,
        "courses": courses,
        "page": page.page(),
        "per_page": page.limit(),
        "total": total,
    })))
}

/// Courses owned by the current instructor, published or not.
pub async fn my_teaching(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let courses = sqlx::query_as::<_, CourseSummary>(&format!(
        "{} WHERE c.instructor_id = $1 ORDER BY c.created_at DESC",
        SUMMARY_SELECT
    ))
    .bind(claims.user_id()?)
    .fetch_all(&pool)
    .await?;

    Ok(Json(json!({ "success": true, "courses": courses })))
}

/// Course detail with its outline: units, lesson titles and quizzes.
/// Unpublished courses are visible to their owner and admins only.
pub async fn get_course(
    State(pool): State<PgPool>,
    Extension(OptionalClaims(claims)): Extension<OptionalClaims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let course = find_course(&pool, id).await?;

    let viewer = match &claims {
        Some(c) => Some(c.user_id()?),
        None => None,
    };
    let can_manage = claims
        .as_ref()
        .is_some_and(|c| c.is_admin() || viewer == Some(course.instructor_id));

    if !course.is_published && !can_manage {
        return Err(AppError::NotFound("Course not found".to_string()));
    }

    let summary = sqlx::query_as::<_, CourseSummary>(&format!("{} WHERE c.id = $1", SUMMARY_SELECT))
        .bind(id)
        .fetch_one(&pool)
        .await?;

    let units = sqlx::query_as::<_, Unit>(
        "SELECT id, course_id, title, description, position FROM units WHERE course_id = $1 ORDER BY position, id",
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let lessons = sqlx::query_as::<_, LessonOutline>(
        r#"
        SELECT l.id, l.unit_id, l.title, l.duration_minutes, l.position
        FROM lessons l
        JOIN units u ON l.unit_id = u.id
        WHERE u.course_id = $1
        ORDER BY l.position, l.id
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let quizzes = sqlx::query_as::<_, QuizOutline>(
        r#"
        SELECT q.id, q.unit_id, q.title, q.passing_score, q.max_attempts, q.time_limit_minutes,
               (SELECT COUNT(*) FROM questions qs WHERE qs.quiz_id = q.id) AS question_count
        FROM quizzes q
        JOIN units u ON q.unit_id = u.id
        WHERE u.course_id = $1
        ORDER BY q.id
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let is_enrolled = match viewer {
        Some(user_id) => is_enrolled(&pool, user_id, id).await?,
        None => false,
    };

    let detail = CourseDetail {
        course,
        instructor_name: summary.instructor_name,
        average_rating: summary.average_rating,
        enrollment_count: summary.enrollment_count,
        is_enrolled,
        units: build_outline(units, lessons, quizzes),
    };

    Ok(Json(json!({ "success": true, "course": detail })))
}

/// Groups lessons and quizzes under their units, keeping unit order.
fn build_outline(
    units: Vec<Unit>,
    lessons: Vec<LessonOutline>,
    quizzes: Vec<QuizOutline>,
) -> Vec<UnitOutline> {
    let mut lessons_by_unit: HashMap<i64, Vec<LessonOutline>> = HashMap::new();
    for lesson in lessons {
        lessons_by_unit.entry(lesson.unit_id).or_default().push(lesson);
    }

    let mut quizzes_by_unit: HashMap<i64, Vec<QuizOutline>> = HashMap::new();
    for quiz in quizzes {
        quizzes_by_unit.entry(quiz.unit_id).or_default().push(quiz);
    }

    units
        .into_iter()
        .map(|unit| UnitOutline {
            lessons: lessons_by_unit.remove(&unit.id).unwrap_or_default(),
            quizzes: quizzes_by_unit.remove(&unit.id).unwrap_or_default(),
            unit,
        })
        .collect()
}

/// Picks a slug that is not taken yet.
async fn unique_slug(pool: &PgPool, title: &str) -> Result<String, AppError> {
    let base = slugify(title);
    let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM courses WHERE slug = $1)")
        .bind(&base)
        .fetch_one(pool)
        .await?;

    if !taken {
        return Ok(base);
    }
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    Ok(format!("{}-{}", base, &suffix[..8]))
}

/// Creates a course owned by the caller.
/// Instructor or admin only.
pub async fn create_course(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateCourseRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let slug = unique_slug(&pool, &payload.title).await?;

    let course = sqlx::query_as::<_, Course>(&format!(
        r#"
        INSERT INTO courses
        (instructor_id, title, slug, description, category, level, price_cents, currency, thumbnail_url)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {}
        "#,
        COURSE_COLUMNS
    ))
    .bind(claims.user_id()?)
    .bind(payload.title.trim())
    .bind(&slug)
    .bind(clean_html(&payload.description))
    .bind(&payload.category)
    .bind(&payload.level)
    .bind(payload.price_cents)
    .bind(payload.currency.to_lowercase())
    .bind(&payload.thumbnail_url)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("Slug '{}' already exists", slug))
        } else {
            tracing::error!("Failed to create course: {:?}", e);
            AppError::from(e)
        }
    })?;

    tracing::info!(course_id = course.id, "Course created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "course": course })),
    ))
}

/// Updates a course. Owner or admin.
pub async fn update_course(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateCourseRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    ensure_course_manager(&pool, &claims, id).await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE courses SET ");
    let mut separated = builder.separated(", ");

    if let Some(title) = payload.title {
        separated.push("title = ");
        separated.push_bind_unseparated(title.trim().to_string());
    }

    if let Some(description) = payload.description {
        separated.push("description = ");
        separated.push_bind_unseparated(clean_html(&description));
    }

    if let Some(category) = payload.category {
        separated.push("category = ");
        separated.push_bind_unseparated(category);
    }

    if let Some(level) = payload.level {
        separated.push("level = ");
        separated.push_bind_unseparated(level);
    }

    if let Some(price_cents) = payload.price_cents {
        separated.push("price_cents = ");
        separated.push_bind_unseparated(price_cents);
    }

    if let Some(currency) = payload.currency {
        separated.push("currency = ");
        separated.push_bind_unseparated(currency.to_lowercase());
    }

    if let Some(thumbnail_url) = payload.thumbnail_url {
        separated.push("thumbnail_url = ");
        separated.push_bind_unseparated(thumbnail_url);
    }

    if let Some(is_published) = payload.is_published {
        separated.push("is_published = ");
        separated.push_bind_unseparated(is_published);
    }

    separated.push("updated_at = NOW()");
    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(format!(" RETURNING {}", COURSE_COLUMNS));

    let course = builder
        .build_query_as::<Course>()
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update course: {:?}", e);
            AppError::from(e)
        })?
        .ok_or(AppError::NotFound("Course not found".to_string()))?;

    Ok(Json(json!({ "success": true, "course": course })))
}

/// Deletes a course and everything under it. Owner or admin.
pub async fn delete_course(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    ensure_course_manager(&pool, &claims, id).await?;

    let mut tx = pool.begin().await?;
    release_course_payments(&mut *tx, &[id]).await?;

    let result = sqlx::query("DELETE FROM courses WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete course: {:?}", e);
            AppError::from(e)
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Course not found".to_string()));
    }

    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Enrolls the caller in a published course.
///
/// Free courses enroll directly; paid courses need a completed payment.
pub async fn enroll(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let course = find_course(&pool, id).await?;

    if !course.is_published {
        return Err(AppError::NotFound("Course not found".to_string()));
    }

    if is_enrolled(&pool, user_id, id).await? {
        return Ok((
            StatusCode::OK,
            Json(json!({ "success": true, "message": "Already enrolled" })),
        ));
    }

    if !course.is_free() {
        let paid: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM payments WHERE user_id = $1 AND course_id = $2 AND status = $3)",
        )
        .bind(user_id)
        .bind(id)
        .bind(STATUS_COMPLETED)
        .fetch_one(&pool)
        .await?;

        if !paid {
            return Err(AppError::PaymentRequired(
                "This course requires payment".to_string(),
            ));
        }
    }

    sqlx::query(
        "INSERT INTO enrollments (user_id, course_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(user_id)
    .bind(id)
    .execute(&pool)
    .await?;

    tracing::info!(user_id, course_id = id, "User enrolled");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "Enrolled successfully" })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: i64, position: i32) -> Unit {
        Unit {
            id,
            course_id: 1,
            title: format!("Unit {}", id),
            description: None,
            position,
        }
    }

    fn lesson(id: i64, unit_id: i64) -> LessonOutline {
        LessonOutline {
            id,
            unit_id,
            title: format!("Lesson {}", id),
            duration_minutes: 5,
            position: 0,
        }
    }

    #[test]
    fn outline_groups_by_unit_in_order() {
        let quiz = QuizOutline {
            id: 30,
            unit_id: 2,
            title: "Checkpoint".to_string(),
            passing_score: 70,
            max_attempts: None,
            time_limit_minutes: None,
            question_count: 4,
        };

        let outline = build_outline(
            vec![unit(1, 0), unit(2, 1), unit(3, 2)],
            vec![lesson(10, 1), lesson(11, 2), lesson(12, 1)],
            vec![quiz],
        );

        assert_eq!(outline.len(), 3);
        assert_eq!(
            outline[0].lessons.iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![10, 12]
        );
        assert_eq!(outline[1].lessons.len(), 1);
        assert_eq!(outline[1].quizzes[0].id, 30);
        assert!(outline[2].lessons.is_empty());
    }
}

// src/models/course.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use url::Url;
use validator::Validate;

pub const COURSE_LEVELS: [&str; 3] = ["beginner", "intermediate", "advanced"];

pub const COURSE_COLUMNS: &str = "id, instructor_id, title, slug, description, category, level, \
     price_cents, currency, thumbnail_url, is_published, created_at, updated_at";

/// Represents the 'courses' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,

    /// Owner of the course. Instructors may only manage their own courses.
    pub instructor_id: i64,

    pub title: String,

    /// URL-friendly unique identifier derived from the title.
    pub slug: String,

    /// Sanitized HTML.
    pub description: String,

    pub category: String,

    /// 'beginner', 'intermediate' or 'advanced'.
    pub level: String,

    /// Price in the smallest currency unit. Zero means the course is free.
    pub price_cents: i64,
    pub currency: String,

    pub thumbnail_url: Option<String>,
    pub is_published: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Course {
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }
}

/// Catalog entry with aggregated rating and enrollment count.
#[derive(Debug, Serialize, FromRow)]
pub struct CourseSummary {
    pub id: i64,
    pub instructor_id: i64,
    pub instructor_name: String,
    pub title: String,
    pub slug: String,
    pub category: String,
    pub level: String,
    pub price_cents: i64,
    pub currency: String,
    pub thumbnail_url: Option<String>,
    pub is_published: bool,
    pub average_rating: Option<f64>,
    pub enrollment_count: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Represents the 'units' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Unit {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub position: i32,
}

/// Represents the 'lessons' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub unit_id: i64,
    pub title: String,
    pub content: String,
    pub video_url: Option<String>,
    pub duration_minutes: i32,
    pub position: i32,
}

/// Lesson entry in the course outline (no content).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LessonOutline {
    pub id: i64,
    pub unit_id: i64,
    pub title: String,
    pub duration_minutes: i32,
    pub position: i32,
}

/// Quiz entry in the course outline.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QuizOutline {
    pub id: i64,
    pub unit_id: i64,
    pub title: String,
    pub passing_score: i32,
    pub max_attempts: Option<i32>,
    pub time_limit_minutes: Option<i32>,
    pub question_count: i64,
}

#[derive(Debug, Serialize)]
pub struct UnitOutline {
    #[serde(flatten)]
    pub unit: Unit,
    pub lessons: Vec<LessonOutline>,
    pub quizzes: Vec<QuizOutline>,
}

#[derive(Debug, Serialize)]
pub struct CourseDetail {
    #[serde(flatten)]
    pub course: Course,
    pub instructor_name: String,
    pub average_rating: Option<f64>,
    pub enrollment_count: i64,
    pub is_enrolled: bool,
    pub units: Vec<UnitOutline>,
}

/// Query parameters for listing courses.
#[derive(Debug, Deserialize)]
pub struct CourseListParams {
    pub category: Option<String>,
    pub level: Option<String>,
    pub q: Option<String>,
    pub instructor_id: Option<i64>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// DTO for creating a new course.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCourseRequest {
    #[validate(length(min = 3, max = 200))]
    pub title: String,
    #[validate(length(max = 20000))]
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1, max = 50))]
    pub category: String,
    #[validate(custom(function = validate_level))]
    #[serde(default = "default_level")]
    pub level: String,
    #[validate(range(min = 0, max = 10_000_000))]
    #[serde(default)]
    pub price_cents: i64,
    #[validate(length(equal = 3))]
    #[serde(default = "default_currency")]
    pub currency: String,
    #[validate(length(max = 500), custom(function = validate_url_string))]
    pub thumbnail_url: Option<String>,
}

/// DTO for updating a course. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCourseRequest {
    #[validate(length(min = 3, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 20000))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub category: Option<String>,
    #[validate(custom(function = validate_level))]
    pub level: Option<String>,
    #[validate(range(min = 0, max = 10_000_000))]
    pub price_cents: Option<i64>,
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
    #[validate(length(max = 500), custom(function = validate_url_string))]
    pub thumbnail_url: Option<String>,
    pub is_published: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUnitRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub position: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUnitRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub position: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLessonRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 100000))]
    #[serde(default)]
    pub content: String,
    #[validate(length(max = 500), custom(function = validate_url_string))]
    pub video_url: Option<String>,
    #[validate(range(min = 0, max = 1440))]
    #[serde(default)]
    pub duration_minutes: i32,
    pub position: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateLessonRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 100000))]
    pub content: Option<String>,
    #[validate(length(max = 500), custom(function = validate_url_string))]
    pub video_url: Option<String>,
    #[validate(range(min = 0, max = 1440))]
    pub duration_minutes: Option<i32>,
    pub position: Option<i32>,
}

fn default_level() -> String {
    "beginner".to_string()
}

fn default_currency() -> String {
    "usd".to_string()
}

fn validate_level(level: &str) -> Result<(), validator::ValidationError> {
    if !COURSE_LEVELS.contains(&level) {
        return Err(validator::ValidationError::new("invalid_level"));
    }
    Ok(())
}

/// Validates that a string is a correctly formatted http(s) URL.
fn validate_url_string(url: &str) -> Result<(), validator::ValidationError> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_url")),
    }
}

/// Builds a URL slug from a title: lowercase ASCII alphanumerics separated by
/// single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        slug.push_str("course");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_titles() {
        assert_eq!(slugify("Intro to Rust"), "intro-to-rust");
        assert_eq!(slugify("  C++ -- The Hard Parts!  "), "c-the-hard-parts");
        assert_eq!(slugify("¿Qué?"), "qu");
        assert_eq!(slugify("!!!"), "course");
    }

    #[test]
    fn create_course_defaults() {
        let req: CreateCourseRequest = serde_json::from_value(serde_json::json!({
            "title": "Async Rust",
            "category": "programming"
        }))
        .unwrap();
        assert_eq!(req.level, "beginner");
        assert_eq!(req.currency, "usd");
        assert_eq!(req.price_cents, 0);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_level_and_bad_urls() {
        let req: CreateCourseRequest = serde_json::from_value(serde_json::json!({
            "title": "Async Rust",
            "category": "programming",
            "level": "expert",
            "thumbnail_url": "javascript:alert(1)"
        }))
        .unwrap();
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("level"));
        assert!(fields.contains_key("thumbnail_url"));
    }
}

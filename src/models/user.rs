// src/models/user.rs

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

pub const ROLE_STUDENT: &str = "student";
pub const ROLE_INSTRUCTOR: &str = "instructor";
pub const ROLE_ADMIN: &str = "admin";

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid username regex"));

/// Column list matching [`User`], shared by every query that loads a full user.
pub const USER_COLUMNS: &str = "id, email, username, password, role, is_active, bio, avatar_url, \
     xp, level, current_streak, longest_streak, last_active_date, stripe_customer_id, \
     created_at, updated_at";

/// Represents the 'users' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,

    /// Unique, stored lowercase.
    pub email: String,

    pub username: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    /// 'student', 'instructor' or 'admin'.
    pub role: String,

    pub is_active: bool,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,

    /// Total experience, always equal to the sum of the user's activity points.
    pub xp: i64,
    pub level: i32,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_active_date: Option<chrono::NaiveDate>,

    #[serde(skip)]
    pub stripe_customer_id: Option<String>,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Profile visible to other users.
#[derive(Debug, Serialize, FromRow)]
pub struct PublicProfile {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub xp: i64,
    pub level: i32,
    pub current_streak: i32,
    pub longest_streak: i32,
    #[serde(skip)]
    pub last_active_date: Option<chrono::NaiveDate>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for registration.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email address."), length(max = 255))]
    pub email: String,
    #[validate(
        length(
            min = 3,
            max = 30,
            message = "Username length must be between 3 and 30 characters."
        ),
        regex(
            path = *USERNAME_RE,
            message = "Username may only contain letters, digits and underscores."
        )
    )]
    pub username: String,
    #[validate(length(
        min = 8,
        max = 128,
        message = "Password length must be between 8 and 128 characters."
    ))]
    pub password: String,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 255))]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// DTO for updating one's own profile. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(
        length(min = 3, max = 30),
        regex(path = *USERNAME_RE)
    )]
    pub username: Option<String>,
    #[validate(length(max = 1000))]
    pub bio: Option<String>,
    #[validate(url, length(max = 500))]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, max = 128))]
    pub current_password: String,
    #[validate(length(
        min = 8,
        max = 128,
        message = "Password length must be between 8 and 128 characters."
    ))]
    pub new_password: String,
}

/// A course the user is enrolled in, with completion progress.
#[derive(Debug, Serialize, FromRow)]
pub struct EnrolledCourse {
    pub course_id: i64,
    pub title: String,
    pub slug: String,
    pub thumbnail_url: Option<String>,
    pub enrolled_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub total_lessons: i64,
    pub completed_lessons: i64,
}

impl EnrolledCourse {
    /// Completion percentage, rounded down.
    pub fn progress(&self) -> i64 {
        if self.total_lessons == 0 {
            return 0;
        }
        self.completed_lessons * 100 / self.total_lessons
    }
}

pub fn is_valid_role(role: &str) -> bool {
    matches!(role, ROLE_STUDENT | ROLE_INSTRUCTOR | ROLE_ADMIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_validation() {
        let ok = RegisterRequest {
            email: "ada@example.com".to_string(),
            username: "ada_l".to_string(),
            password: "correct horse".to_string(),
        };
        assert!(ok.validate().is_ok());

        let bad_name = RegisterRequest {
            username: "ada lovelace!".to_string(),
            ..ok_request()
        };
        assert!(bad_name.validate().is_err());

        let bad_email = RegisterRequest {
            email: "not-an-email".to_string(),
            ..ok_request()
        };
        assert!(bad_email.validate().is_err());

        let short_password = RegisterRequest {
            password: "short".to_string(),
            ..ok_request()
        };
        assert!(short_password.validate().is_err());
    }

    fn ok_request() -> RegisterRequest {
        RegisterRequest {
            email: "ada@example.com".to_string(),
            username: "ada_l".to_string(),
            password: "correct horse".to_string(),
        }
    }

    #[test]
    fn progress_percentage() {
        let mut course = EnrolledCourse {
            course_id: 1,
            title: "Rust".to_string(),
            slug: "rust".to_string(),
            thumbnail_url: None,
            enrolled_at: chrono::Utc::now(),
            completed_at: None,
            total_lessons: 3,
            completed_lessons: 2,
        };
        assert_eq!(course.progress(), 66);

        course.total_lessons = 0;
        assert_eq!(course.progress(), 0);
    }

    #[test]
    fn roles() {
        assert!(is_valid_role("student"));
        assert!(is_valid_role("admin"));
        assert!(!is_valid_role("root"));
    }
}

// src/models/discussion.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'discussions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Discussion {
    pub id: i64,
    pub course_id: i64,
    pub user_id: i64,
    pub title: String,
    pub body: String,
    pub replies_count: i32,
    pub is_pinned: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Discussion with its author's username, for listings.
#[derive(Debug, Serialize, FromRow)]
pub struct DiscussionSummary {
    pub id: i64,
    pub course_id: i64,
    pub user_id: i64,
    pub username: String,
    pub title: String,
    pub body: String,
    pub replies_count: i32,
    pub is_pinned: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for displaying a reply with author info.
#[derive(Debug, Serialize, FromRow)]
pub struct ReplyResponse {
    pub id: i64,
    pub discussion_id: i64,
    pub user_id: i64,
    pub username: String,
    pub body: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct DiscussionThread {
    #[serde(flatten)]
    pub discussion: DiscussionSummary,
    pub replies: Vec<ReplyResponse>,
}

/// DTO for creating a new discussion.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateDiscussionRequest {
    #[validate(length(min = 3, max = 200, message = "Title must be between 3 and 200 characters"))]
    pub title: String,
    #[validate(length(min = 1, max = 10000, message = "Body must be between 1 and 10000 characters"))]
    pub body: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateDiscussionRequest {
    #[validate(length(min = 3, max = 200))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 10000))]
    pub body: Option<String>,
}

/// DTO for creating a reply.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateReplyRequest {
    #[validate(length(min = 1, max = 5000, message = "Reply must be between 1 and 5000 characters"))]
    pub body: String,
}

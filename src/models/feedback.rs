// src/models/feedback.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'feedback' table: one rating per user and course.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Feedback {
    pub user_id: i64,
    pub course_id: i64,
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct FeedbackResponse {
    pub user_id: i64,
    pub username: String,
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for rating a course.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitFeedbackRequest {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i16,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

/// Aggregate over every rating of a course.
#[derive(Debug, Serialize, PartialEq)]
pub struct RatingSummary {
    pub average: Option<f64>,
    pub count: i64,
    /// Number of ratings for 1, 2, 3, 4 and 5 stars.
    pub distribution: [i64; 5],
}

impl RatingSummary {
    pub fn from_ratings(ratings: impl IntoIterator<Item = i16>) -> Self {
        let mut distribution = [0i64; 5];
        let mut count = 0i64;
        let mut total = 0i64;

        for rating in ratings {
            if !(1..=5).contains(&rating) {
                continue;
            }
            distribution[(rating - 1) as usize] += 1;
            count += 1;
            total += rating as i64;
        }

        let average = if count == 0 {
            None
        } else {
            // Two decimals
            Some(((total as f64 / count as f64) * 100.0).round() / 100.0)
        };

        Self {
            average,
            count,
            distribution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_of_ratings() {
        let summary = RatingSummary::from_ratings([5, 4, 4, 1]);
        assert_eq!(summary.count, 4);
        assert_eq!(summary.average, Some(3.5));
        assert_eq!(summary.distribution, [1, 0, 0, 2, 1]);
    }

    #[test]
    fn summary_rounds_and_handles_empty() {
        assert_eq!(RatingSummary::from_ratings([5, 4, 4]).average, Some(4.33));

        let empty = RatingSummary::from_ratings([]);
        assert_eq!(empty.average, None);
        assert_eq!(empty.count, 0);
    }
}

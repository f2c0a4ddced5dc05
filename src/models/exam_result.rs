// src/models/exam_result.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};

/// Represents the 'exam_results' table in the database.
/// One row per graded quiz attempt.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamResult {
    pub id: i64,
    pub user_id: i64,
    pub quiz_id: i64,
    pub course_id: i64,
    /// Percentage, 0 to 100.
    pub score: i32,
    pub points_earned: i32,
    pub points_possible: i32,
    pub correct_count: i32,
    pub total_questions: i32,
    pub passed: bool,
    pub attempt_number: i32,
    /// Submitted answers keyed by question id.
    pub answers: Json<HashMap<String, Vec<String>>>,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

pub const EXAM_RESULT_COLUMNS: &str = "id, user_id, quiz_id, course_id, score, points_earned, \
     points_possible, correct_count, total_questions, passed, attempt_number, answers, submitted_at";

/// Result row joined with quiz and user names, for listings.
#[derive(Debug, Serialize, FromRow)]
pub struct ExamResultSummary {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub quiz_id: i64,
    pub quiz_title: String,
    pub course_id: i64,
    pub score: i32,
    pub passed: bool,
    pub attempt_number: i32,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

/// An answer as sent by the client: a single value or a list of values.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SubmittedAnswer {
    One(String),
    Many(Vec<String>),
}

impl SubmittedAnswer {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            SubmittedAnswer::One(value) => vec![value],
            SubmittedAnswer::Many(values) => values,
        }
    }
}

/// DTO for submitting a quiz attempt.
#[derive(Debug, Deserialize)]
pub struct SubmitExamRequest {
    /// User's answers map.
    /// Key: Question ID
    /// Value: selected option(s) or free text
    pub answers: HashMap<i64, SubmittedAnswer>,
}

/// Per-question feedback returned after grading.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuestionOutcome {
    pub question_id: i64,
    pub correct: bool,
    pub points_awarded: i32,
    pub correct_answers: Vec<String>,
    pub explanation: Option<String>,
}

/// Response for a submitted attempt.
#[derive(Debug, Serialize)]
pub struct ExamSubmissionResponse {
    pub success: bool,
    pub result: ExamResult,
    pub questions: Vec<QuestionOutcome>,
    pub points_awarded: i64,
    pub new_achievements: Vec<&'static str>,
    pub level: i32,
    pub leveled_up: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_single_and_multiple_answers() {
        let req: SubmitExamRequest = serde_json::from_value(serde_json::json!({
            "answers": { "1": "Paris", "2": ["a", "b"] }
        }))
        .unwrap();

        let mut answers: Vec<(i64, Vec<String>)> = req
            .answers
            .into_iter()
            .map(|(id, a)| (id, a.into_vec()))
            .collect();
        answers.sort_by_key(|(id, _)| *id);

        assert_eq!(answers[0], (1, vec!["Paris".to_string()]));
        assert_eq!(answers[1], (2, vec!["a".to_string(), "b".to_string()]));
    }
}

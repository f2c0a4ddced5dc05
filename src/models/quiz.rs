// src/models/quiz.rs

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::{Validate, ValidationError};

/// Kind of a quiz question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Exactly one option is correct.
    Single,
    /// Any non-empty subset of options may be correct.
    Multiple,
    /// Options are "true" and "false".
    TrueFalse,
    /// Free text, compared trimmed and case-insensitively.
    ShortAnswer,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::Single => "single",
            QuestionKind::Multiple => "multiple",
            QuestionKind::TrueFalse => "true_false",
            QuestionKind::ShortAnswer => "short_answer",
        }
    }

    pub fn has_options(&self) -> bool {
        !matches!(self, QuestionKind::ShortAnswer)
    }
}

impl FromStr for QuestionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(QuestionKind::Single),
            "multiple" => Ok(QuestionKind::Multiple),
            "true_false" => Ok(QuestionKind::TrueFalse),
            "short_answer" => Ok(QuestionKind::ShortAnswer),
            other => Err(format!("Unknown question kind '{}'", other)),
        }
    }
}

/// Represents the 'quizzes' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Quiz {
    pub id: i64,
    pub unit_id: i64,
    pub title: String,
    /// Minimum percentage needed to pass.
    pub passing_score: i32,
    /// `None` means unlimited attempts.
    pub max_attempts: Option<i32>,
    pub time_limit_minutes: Option<i32>,
}

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,

    /// One of [`QuestionKind`], stored as text.
    pub kind: String,

    pub prompt: String,

    /// List of options (e.g., ["Option A", "Option B"]).
    /// Stored as a JSON array in the database.
    pub options: Json<Vec<String>>,

    /// Accepted answers. For choice questions these are option texts.
    pub correct_answers: Json<Vec<String>>,

    pub points: i32,
    pub explanation: Option<String>,
    pub position: i32,
}

/// DTO for sending question to client (excludes answers and explanation).
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub kind: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub points: i32,
}

impl From<Question> for PublicQuestion {
    fn from(q: Question) -> Self {
        PublicQuestion {
            id: q.id,
            kind: q.kind,
            prompt: q.prompt,
            options: q.options.0,
            points: q.points,
        }
    }
}

/// A quiz ready to be taken: answers hidden, attempt budget attached.
#[derive(Debug, Serialize)]
pub struct QuizPaper {
    #[serde(flatten)]
    pub quiz: Quiz,
    pub course_id: i64,
    pub questions: Vec<PublicQuestion>,
    pub attempts_used: i64,
    pub attempts_remaining: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(range(min = 0, max = 100))]
    pub passing_score: Option<i32>,
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: Option<i32>,
    #[validate(range(min = 1, max = 600))]
    pub time_limit_minutes: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(range(min = 0, max = 100))]
    pub passing_score: Option<i32>,
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: Option<i32>,
    #[validate(range(min = 1, max = 600))]
    pub time_limit_minutes: Option<i32>,
}

/// DTO for creating a new question.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = validate_question_shape))]
pub struct CreateQuestionRequest {
    pub kind: QuestionKind,
    #[validate(length(min = 1, max = 2000))]
    pub prompt: String,
    #[serde(default)]
    #[validate(custom(function = validate_options))]
    pub options: Vec<String>,
    #[validate(length(min = 1, max = 20))]
    pub correct_answers: Vec<String>,
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_points")]
    pub points: i32,
    #[validate(length(max = 2000))]
    pub explanation: Option<String>,
    pub position: Option<i32>,
}

/// DTO for updating a question. Fields are optional; the merged result is
/// re-validated as a whole before it is stored.
#[derive(Debug, Deserialize)]
pub struct UpdateQuestionRequest {
    pub kind: Option<QuestionKind>,
    pub prompt: Option<String>,
    pub options: Option<Vec<String>>,
    pub correct_answers: Option<Vec<String>>,
    pub points: Option<i32>,
    pub explanation: Option<String>,
    pub position: Option<i32>,
}

impl UpdateQuestionRequest {
    /// Applies the changes on top of an existing question.
    pub fn merge_into(self, existing: &Question) -> Result<CreateQuestionRequest, String> {
        let kind = match self.kind {
            Some(kind) => kind,
            None => existing.kind.parse()?,
        };
        Ok(CreateQuestionRequest {
            kind,
            prompt: self.prompt.unwrap_or_else(|| existing.prompt.clone()),
            options: self.options.unwrap_or_else(|| existing.options.0.clone()),
            correct_answers: self
                .correct_answers
                .unwrap_or_else(|| existing.correct_answers.0.clone()),
            points: self.points.unwrap_or(existing.points),
            explanation: self.explanation.or_else(|| existing.explanation.clone()),
            position: Some(self.position.unwrap_or(existing.position)),
        })
    }
}

fn default_points() -> i32 {
    1
}

fn validate_options(options: &[String]) -> Result<(), ValidationError> {
    if options.len() > 20 {
        return Err(ValidationError::new("too_many_options"));
    }
    for opt in options {
        if opt.trim().is_empty() {
            return Err(ValidationError::new("option_cannot_be_empty"));
        }
        if opt.len() > 500 {
            return Err(ValidationError::new("option_too_long"));
        }
    }
    Ok(())
}

/// Cross-field rules: choice questions need options, every correct answer
/// must be one of them, and single-answer kinds have exactly one.
fn validate_question_shape(req: &CreateQuestionRequest) -> Result<(), ValidationError> {
    if req.correct_answers.iter().any(|a| a.trim().is_empty()) {
        return Err(ValidationError::new("answer_cannot_be_empty"));
    }

    match req.kind {
        QuestionKind::ShortAnswer => return Ok(()),
        QuestionKind::TrueFalse => {
            let valid = req.options.len() == 2
                && req.options.iter().any(|o| o == "true")
                && req.options.iter().any(|o| o == "false");
            if !valid {
                return Err(ValidationError::new("true_false_options_must_be_true_and_false"));
            }
        }
        QuestionKind::Single | QuestionKind::Multiple => {
            if req.options.len() < 2 {
                return Err(ValidationError::new("at_least_two_options_required"));
            }
        }
    }

    if matches!(req.kind, QuestionKind::Single | QuestionKind::TrueFalse)
        && req.correct_answers.len() != 1
    {
        return Err(ValidationError::new("exactly_one_correct_answer_required"));
    }

    if !req
        .correct_answers
        .iter()
        .all(|answer| req.options.contains(answer))
    {
        return Err(ValidationError::new("correct_answer_not_in_options"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single() -> CreateQuestionRequest {
        CreateQuestionRequest {
            kind: QuestionKind::Single,
            prompt: "2 + 2?".to_string(),
            options: vec!["3".to_string(), "4".to_string()],
            correct_answers: vec!["4".to_string()],
            points: 1,
            explanation: None,
            position: None,
        }
    }

    #[test]
    fn accepts_well_formed_questions() {
        assert!(single().validate().is_ok());

        let short = CreateQuestionRequest {
            kind: QuestionKind::ShortAnswer,
            options: vec![],
            correct_answers: vec!["Ferris".to_string()],
            ..single()
        };
        assert!(short.validate().is_ok());

        let tf = CreateQuestionRequest {
            kind: QuestionKind::TrueFalse,
            options: vec!["true".to_string(), "false".to_string()],
            correct_answers: vec!["false".to_string()],
            ..single()
        };
        assert!(tf.validate().is_ok());
    }

    #[test]
    fn rejects_answers_outside_options() {
        let req = CreateQuestionRequest {
            correct_answers: vec!["5".to_string()],
            ..single()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn single_needs_exactly_one_answer() {
        let req = CreateQuestionRequest {
            correct_answers: vec!["3".to_string(), "4".to_string()],
            ..single()
        };
        assert!(req.validate().is_err());

        let multiple = CreateQuestionRequest {
            kind: QuestionKind::Multiple,
            correct_answers: vec!["3".to_string(), "4".to_string()],
            ..single()
        };
        assert!(multiple.validate().is_ok());
    }

    #[test]
    fn kind_round_trips_through_text() {
        for kind in [
            QuestionKind::Single,
            QuestionKind::Multiple,
            QuestionKind::TrueFalse,
            QuestionKind::ShortAnswer,
        ] {
            assert_eq!(kind.as_str().parse::<QuestionKind>().unwrap(), kind);
        }
        assert!("essay".parse::<QuestionKind>().is_err());
    }

    #[test]
    fn merge_keeps_unchanged_fields() {
        let existing = Question {
            id: 7,
            quiz_id: 1,
            kind: "single".to_string(),
            prompt: "Capital of France?".to_string(),
            options: Json(vec!["Paris".to_string(), "Rome".to_string()]),
            correct_answers: Json(vec!["Paris".to_string()]),
            points: 2,
            explanation: Some("Geography".to_string()),
            position: 3,
        };
        let update = UpdateQuestionRequest {
            kind: None,
            prompt: Some("Capital city of France?".to_string()),
            options: None,
            correct_answers: None,
            points: None,
            explanation: None,
            position: None,
        };
        let merged = update.merge_into(&existing).unwrap();
        assert_eq!(merged.kind, QuestionKind::Single);
        assert_eq!(merged.prompt, "Capital city of France?");
        assert_eq!(merged.points, 2);
        assert_eq!(merged.position, Some(3));
        assert!(merged.validate().is_ok());
    }
}

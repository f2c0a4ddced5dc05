// src/handlers/exams.rs

use std::collections::{HashMap, HashSet};

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgPool, types::Json as SqlJson};
use validator::Validate;

use crate::{
    config::DEFAULT_PASSING_SCORE,
    error::{AppError, is_unique_violation},
    models::{
        exam_result::{
            EXAM_RESULT_COLUMNS, ExamResult, ExamResultSummary, ExamSubmissionResponse,
            QuestionOutcome, SubmitExamRequest,
        },
        quiz::{
            CreateQuestionRequest, CreateQuizRequest, PublicQuestion, Question, QuestionKind,
            Quiz, QuizPaper, UpdateQuestionRequest, UpdateQuizRequest,
        },
    },
    services::gamification::{self, ActivityKind},
    utils::{
        access::{
            course_of_question, course_of_quiz, course_of_unit, ensure_course_manager,
            ensure_course_member,
        },
        html::strip_tags,
        jwt::Claims,
    },
};

const QUIZ_COLUMNS: &str = "id, unit_id, title, passing_score, max_attempts, time_limit_minutes";
const QUESTION_COLUMNS: &str =
    "id, quiz_id, kind, prompt, options, correct_answers, points, explanation, position";

/// Result of grading one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Grade {
    pub points_earned: i32,
    pub points_possible: i32,
    pub correct_count: i32,
    /// Percentage, 0 to 100.
    pub score: i32,
    pub passed: bool,
    pub outcomes: Vec<QuestionOutcome>,
}

fn normalize(kind: Option<QuestionKind>, answer: &str) -> String {
    match kind {
        Some(QuestionKind::ShortAnswer) => answer.trim().to_lowercase(),
        _ => answer.trim().to_string(),
    }
}

/// Grades submitted answers against the answer key.
///
/// A question is correct when the set of submitted answers equals the set of
/// correct answers. Missing answers are wrong; answers to unknown question
/// ids are ignored.
pub fn grade(
    questions: &[Question],
    answers: &HashMap<i64, Vec<String>>,
    passing_score: i32,
) -> Grade {
    let mut points_earned = 0;
    let mut points_possible = 0;
    let mut correct_count = 0;
    let mut outcomes = Vec::with_capacity(questions.len());

    for question in questions {
        let kind = question.kind.parse::<QuestionKind>().ok();
        points_possible += question.points;

        let expected: HashSet<String> = question
            .correct_answers
            .iter()
            .map(|a| normalize(kind, a))
            .collect();

        let correct = answers.get(&question.id).is_some_and(|given| {
            let given: HashSet<String> = given
                .iter()
                .map(|a| normalize(kind, a))
                .filter(|a| !a.is_empty())
                .collect();
            !given.is_empty() && given == expected
        });

        if correct {
            points_earned += question.points;
            correct_count += 1;
        }

        outcomes.push(QuestionOutcome {
            question_id: question.id,
            correct,
            points_awarded: if correct { question.points } else { 0 },
            correct_answers: question.correct_answers.0.clone(),
            explanation: question.explanation.clone(),
        });
    }

    let score = if points_possible == 0 {
        0
    } else {
        ((points_earned as f64 / points_possible as f64) * 100.0).round() as i32
    };

    Grade {
        points_earned,
        points_possible,
        correct_count,
        score,
        passed: points_possible > 0 && score >= passing_score,
        outcomes,
    }
}

async fn find_quiz(pool: &PgPool, id: i64) -> Result<Quiz, AppError> {
    sqlx::query_as::<_, Quiz>(&format!("SELECT {} FROM quizzes WHERE id = $1", QUIZ_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Quiz not found".to_string()))
}

async fn quiz_questions(pool: &PgPool, quiz_id: i64) -> Result<Vec<Question>, AppError> {
    let questions = sqlx::query_as::<_, Question>(&format!(
        "SELECT {} FROM questions WHERE quiz_id = $1 ORDER BY position, id",
        QUESTION_COLUMNS
    ))
    .bind(quiz_id)
    .fetch_all(pool)
    .await?;
    Ok(questions)
}

async fn attempts_used(pool: &PgPool, user_id: i64, quiz_id: i64) -> Result<i64, AppError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM exam_results WHERE user_id = $1 AND quiz_id = $2")
            .bind(user_id)
            .bind(quiz_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

// ---- Authoring ----

pub async fn create_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(unit_id): Path<i64>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let course_id = course_of_unit(&pool, unit_id).await?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    let quiz = sqlx::query_as::<_, Quiz>(&format!(
        r#"
        INSERT INTO quizzes (unit_id, title, passing_score, max_attempts, time_limit_minutes)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {}
        "#,
        QUIZ_COLUMNS
    ))
    .bind(unit_id)
    .bind(payload.title.trim())
    .bind(payload.passing_score.unwrap_or(DEFAULT_PASSING_SCORE))
    .bind(payload.max_attempts)
    .bind(payload.time_limit_minutes)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create quiz: {:?}", e);
        AppError::from(e)
    })?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "quiz": quiz })),
    ))
}

pub async fn update_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let course_id = course_of_quiz(&pool, id).await?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    let quiz = sqlx::query_as::<_, Quiz>(&format!(
        r#"
        UPDATE quizzes
        SET title = COALESCE($1, title),
            passing_score = COALESCE($2, passing_score),
            max_attempts = COALESCE($3, max_attempts),
            time_limit_minutes = COALESCE($4, time_limit_minutes)
        WHERE id = $5
        RETURNING {}
        "#,
        QUIZ_COLUMNS
    ))
    .bind(payload.title.as_deref().map(str::trim))
    .bind(payload.passing_score)
    .bind(payload.max_attempts)
    .bind(payload.time_limit_minutes)
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Quiz not found".to_string()))?;

    Ok(Json(json!({ "success": true, "quiz": quiz })))
}

pub async fn delete_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = course_of_quiz(&pool, id).await?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    sqlx::query("DELETE FROM quizzes WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Questions of a quiz including the answer key. Owner or admin.
pub async fn list_questions(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = course_of_quiz(&pool, quiz_id).await?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    let questions = quiz_questions(&pool, quiz_id).await?;
    Ok(Json(json!({ "success": true, "questions": questions })))
}

async fn store_question(
    pool: &PgPool,
    quiz_id: i64,
    existing: Option<i64>,
    req: CreateQuestionRequest,
) -> Result<Question, AppError> {
    let prompt = strip_tags(&req.prompt);
    let explanation = req.explanation.as_deref().map(strip_tags);

    let query = match existing {
        None => format!(
            r#"
            INSERT INTO questions
            (quiz_id, kind, prompt, options, correct_answers, points, explanation, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7,
                COALESCE($8, (SELECT COALESCE(MAX(position) + 1, 0) FROM questions WHERE quiz_id = $1)))
            RETURNING {}
            "#,
            QUESTION_COLUMNS
        ),
        Some(_) => format!(
            r#"
            UPDATE questions
            SET kind = $2, prompt = $3, options = $4, correct_answers = $5,
                points = $6, explanation = $7, position = COALESCE($8, position)
            WHERE id = $1
            RETURNING {}
            "#,
            QUESTION_COLUMNS
        ),
    };

    let question = sqlx::query_as::<_, Question>(&query)
        .bind(existing.unwrap_or(quiz_id))
        .bind(req.kind.as_str())
        .bind(prompt)
        .bind(SqlJson(req.options))
        .bind(SqlJson(req.correct_answers))
        .bind(req.points)
        .bind(explanation)
        .bind(req.position)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to store question: {:?}", e);
            AppError::from(e)
        })?;

    Ok(question)
}

pub async fn create_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let course_id = course_of_quiz(&pool, quiz_id).await?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    let question = store_question(&pool, quiz_id, None, payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "question": question })),
    ))
}

pub async fn update_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = course_of_question(&pool, id).await?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    let existing = sqlx::query_as::<_, Question>(&format!(
        "SELECT {} FROM questions WHERE id = $1",
        QUESTION_COLUMNS
    ))
    .bind(id)
    .fetch_one(&pool)
    .await?;

    let merged = payload
        .merge_into(&existing)
        .map_err(AppError::BadRequest)?;
    merged.validate()?;

    let question = store_question(&pool, existing.quiz_id, Some(id), merged).await?;

    Ok(Json(json!({ "success": true, "question": question })))
}

pub async fn delete_question(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = course_of_question(&pool, id).await?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    sqlx::query("DELETE FROM questions WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ---- Taking quizzes ----

/// Quiz paper with the answers hidden and the caller's attempt budget.
pub async fn get_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = course_of_quiz(&pool, id).await?;
    ensure_course_member(&pool, &claims, course_id).await?;

    let quiz = find_quiz(&pool, id).await?;
    let questions = quiz_questions(&pool, id).await?;
    let used = attempts_used(&pool, claims.user_id()?, id).await?;

    let paper = QuizPaper {
        attempts_remaining: quiz.max_attempts.map(|max| (max as i64 - used).max(0)),
        attempts_used: used,
        course_id,
        questions: questions.into_iter().map(PublicQuestion::from).collect(),
        quiz,
    };

    Ok(Json(json!({ "success": true, "quiz": paper })))
}

/// Grades an attempt, stores it and awards points.
pub async fn submit_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(req): Json<SubmitExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let course_id = course_of_quiz(&pool, id).await?;
    ensure_course_member(&pool, &claims, course_id).await?;

    let quiz = find_quiz(&pool, id).await?;
    let questions = quiz_questions(&pool, id).await?;

    if questions.is_empty() {
        return Err(AppError::BadRequest("Quiz has no questions".to_string()));
    }

    let used = attempts_used(&pool, user_id, id).await?;
    if let Some(max) = quiz.max_attempts.filter(|max| used >= *max as i64) {
        return Err(AppError::Conflict(format!(
            "Maximum attempts ({}) reached",
            max
        )));
    }

    let answers: HashMap<i64, Vec<String>> = req
        .answers
        .into_iter()
        .map(|(question_id, answer)| (question_id, answer.into_vec()))
        .collect();

    let graded = grade(&questions, &answers, quiz.passing_score);

    let stored_answers: HashMap<String, Vec<String>> = answers
        .into_iter()
        .map(|(question_id, values)| (question_id.to_string(), values))
        .collect();

    let mut tx = pool.begin().await?;

    let result = sqlx::query_as::<_, ExamResult>(&format!(
        r#"
        INSERT INTO exam_results
        (user_id, quiz_id, course_id, score, points_earned, points_possible,
         correct_count, total_questions, passed, attempt_number, answers)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {}
        "#,
        EXAM_RESULT_COLUMNS
    ))
    .bind(user_id)
    .bind(id)
    .bind(course_id)
    .bind(graded.score)
    .bind(graded.points_earned)
    .bind(graded.points_possible)
    .bind(graded.correct_count)
    .bind(questions.len() as i32)
    .bind(graded.passed)
    .bind(used as i32 + 1)
    .bind(SqlJson(stored_answers))
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Another attempt is being submitted".to_string())
        } else {
            tracing::error!("Failed to store exam result: {:?}", e);
            AppError::from(e)
        }
    })?;

    let description = format!("Quiz: {}", quiz.title);
    let mut kinds = vec![if graded.passed {
        ActivityKind::QuizPassed
    } else {
        ActivityKind::QuizAttempted
    }];
    if graded.score == 100 {
        kinds.push(ActivityKind::PerfectScore);
    }

    // Each kind pays out once per quiz; resubmitting earns nothing new.
    let mut points_awarded = 0;
    let mut new_achievements: Vec<&'static str> = Vec::new();
    let mut leveled_up = false;
    let mut level = None;
    for kind in kinds {
        if let Some(mut outcome) =
            gamification::award_once(&mut *tx, user_id, kind, id, &description).await?
        {
            points_awarded += outcome.points;
            new_achievements.append(&mut outcome.new_achievements);
            leveled_up |= outcome.leveled_up;
            level = Some(outcome.level);
        }
    }

    let level = match level {
        Some(level) => level,
        None => {
            sqlx::query_scalar::<_, i32>("SELECT level FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?
        }
    };

    tx.commit().await?;

    tracing::info!(
        user_id,
        quiz_id = id,
        score = graded.score,
        passed = graded.passed,
        "Exam submitted"
    );

    Ok(Json(ExamSubmissionResponse {
        success: true,
        result,
        questions: graded.outcomes,
        points_awarded,
        new_achievements,
        level,
        leveled_up,
    }))
}

const SUMMARY_SELECT: &str = r#"
    SELECT r.id, r.user_id, u.username, r.quiz_id, q.title AS quiz_title, r.course_id,
           r.score, r.passed, r.attempt_number, r.submitted_at
    FROM exam_results r
    JOIN users u ON r.user_id = u.id
    JOIN quizzes q ON r.quiz_id = q.id
"#;

/// The caller's attempts, newest first.
pub async fn my_results(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let results = sqlx::query_as::<_, ExamResultSummary>(&format!(
        "{} WHERE r.user_id = $1 ORDER BY r.submitted_at DESC",
        SUMMARY_SELECT
    ))
    .bind(claims.user_id()?)
    .fetch_all(&pool)
    .await?;

    Ok(Json(json!({ "success": true, "results": results })))
}

/// One attempt with its submitted answers. Own results only, unless admin.
pub async fn get_result(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query_as::<_, ExamResult>(&format!(
        "SELECT {} FROM exam_results WHERE id = $1",
        EXAM_RESULT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Result not found".to_string()))?;

    // Someone else's result looks the same as a missing one.
    if result.user_id != claims.user_id()? && !claims.is_admin() {
        return Err(AppError::NotFound("Result not found".to_string()));
    }

    Ok(Json(json!({ "success": true, "result": result })))
}

/// Every attempt on a quiz. Course owner or admin.
pub async fn quiz_results(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = course_of_quiz(&pool, id).await?;
    ensure_course_manager(&pool, &claims, course_id).await?;

    let results = sqlx::query_as::<_, ExamResultSummary>(&format!(
        "{} WHERE r.quiz_id = $1 ORDER BY r.submitted_at DESC",
        SUMMARY_SELECT
    ))
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(json!({ "success": true, "results": results })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: i64, kind: QuestionKind, correct: &[&str], points: i32) -> Question {
        Question {
            id,
            quiz_id: 1,
            kind: kind.as_str().to_string(),
            prompt: format!("Question {}", id),
            options: SqlJson(vec!["a".into(), "b".into(), "c".into()]),
            correct_answers: SqlJson(correct.iter().map(|s| s.to_string()).collect()),
            points,
            explanation: Some("because".to_string()),
            position: id as i32,
        }
    }

    fn answers(pairs: &[(i64, &[&str])]) -> HashMap<i64, Vec<String>> {
        pairs
            .iter()
            .map(|(id, values)| (*id, values.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn multiple_choice_is_order_insensitive() {
        let questions = vec![question(1, QuestionKind::Multiple, &["a", "c"], 2)];

        let g = grade(&questions, &answers(&[(1, &["c", "a"])]), 70);
        assert_eq!((g.points_earned, g.score, g.passed), (2, 100, true));
        assert!(g.outcomes[0].correct);
    }

    #[test]
    fn partial_selection_is_wrong() {
        let questions = vec![question(1, QuestionKind::Multiple, &["a", "c"], 2)];

        let g = grade(&questions, &answers(&[(1, &["a"])]), 70);
        assert_eq!((g.points_earned, g.correct_count, g.score), (0, 0, 0));

        let g = grade(&questions, &answers(&[(1, &["a", "b", "c"])]), 70);
        assert_eq!(g.correct_count, 0);
    }

    #[test]
    fn short_answer_ignores_case_and_whitespace() {
        let questions = vec![question(1, QuestionKind::ShortAnswer, &["Ferris"], 1)];

        let g = grade(&questions, &answers(&[(1, &["  fERRIS "])]), 70);
        assert!(g.outcomes[0].correct);

        let g = grade(&questions, &answers(&[(1, &["Ferris the crab"])]), 70);
        assert!(!g.outcomes[0].correct);
    }

    #[test]
    fn choice_answers_are_case_sensitive() {
        let questions = vec![question(1, QuestionKind::Single, &["a"], 1)];
        let g = grade(&questions, &answers(&[(1, &["A"])]), 70);
        assert!(!g.outcomes[0].correct);
    }

    #[test]
    fn score_is_rounded_percentage_of_points() {
        let questions = vec![
            question(1, QuestionKind::Single, &["a"], 1),
            question(2, QuestionKind::Single, &["b"], 1),
            question(3, QuestionKind::Single, &["c"], 1),
        ];

        // 2 of 3 points -> 66.67 -> 67
        let g = grade(&questions, &answers(&[(1, &["a"]), (2, &["b"])]), 70);
        assert_eq!(g.score, 67);
        assert!(!g.passed);
        assert_eq!(g.points_possible, 3);

        let g = grade(&questions, &answers(&[(1, &["a"]), (2, &["b"])]), 67);
        assert!(g.passed);
    }

    #[test]
    fn unanswered_and_unknown_questions() {
        let questions = vec![
            question(1, QuestionKind::Single, &["a"], 3),
            question(2, QuestionKind::TrueFalse, &["true"], 1),
        ];

        let g = grade(&questions, &answers(&[(1, &["a"]), (99, &["a"])]), 70);
        assert_eq!(g.outcomes.len(), 2);
        assert_eq!(g.points_earned, 3);
        assert_eq!(g.score, 75);
        assert!(!g.outcomes[1].correct);
        assert_eq!(g.outcomes[1].correct_answers, vec!["true".to_string()]);
    }

    #[test]
    fn empty_answer_never_matches() {
        let questions = vec![question(1, QuestionKind::ShortAnswer, &["x"], 1)];
        let g = grade(&questions, &answers(&[(1, &["   "])]), 0);
        assert!(!g.outcomes[0].correct);
    }

    #[test]
    fn no_questions_scores_zero() {
        let g = grade(&[], &HashMap::new(), 0);
        assert_eq!((g.score, g.points_possible, g.passed), (0, 0, false));
    }
}

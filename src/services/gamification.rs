// src/services/gamification.rs

//! Points ledger, levels, streaks and achievements.
//!
//! Every award is one row in `activities`; the user's `xp` column is kept
//! equal to the sum of their activity points inside the same transaction.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::{config::XP_PER_LEVEL, error::AppError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    DailyLogin,
    LessonCompleted,
    CourseCompleted,
    QuizPassed,
    PerfectScore,
    QuizAttempted,
    DiscussionCreated,
    ReplyCreated,
    FeedbackGiven,
    AchievementUnlocked,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::DailyLogin => "daily_login",
            ActivityKind::LessonCompleted => "lesson_completed",
            ActivityKind::CourseCompleted => "course_completed",
            ActivityKind::QuizPassed => "quiz_passed",
            ActivityKind::PerfectScore => "perfect_score",
            ActivityKind::QuizAttempted => "quiz_attempted",
            ActivityKind::DiscussionCreated => "discussion_created",
            ActivityKind::ReplyCreated => "reply_created",
            ActivityKind::FeedbackGiven => "feedback_given",
            ActivityKind::AchievementUnlocked => "achievement_unlocked",
        }
    }

    pub fn points(&self) -> i32 {
        match self {
            ActivityKind::DailyLogin => 1,
            ActivityKind::LessonCompleted => 10,
            ActivityKind::CourseCompleted => 100,
            ActivityKind::QuizPassed => 50,
            ActivityKind::PerfectScore => 25,
            ActivityKind::QuizAttempted => 5,
            ActivityKind::DiscussionCreated => 5,
            ActivityKind::ReplyCreated => 2,
            ActivityKind::FeedbackGiven => 5,
            ActivityKind::AchievementUnlocked => 0,
        }
    }
}

/// `floor(xp / 1000) + 1`; negative xp is treated as zero.
pub fn level_for_xp(xp: i64) -> i32 {
    (xp.max(0) / XP_PER_LEVEL + 1) as i32
}

/// Experience gathered inside the current level, and the size of a level.
pub fn level_progress(xp: i64) -> (i64, i64) {
    (xp.max(0) % XP_PER_LEVEL, XP_PER_LEVEL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Streak {
    pub current: i32,
    pub longest: i32,
    pub last_active: NaiveDate,
}

/// Buckets the gap between the last active day and `today`.
///
/// Same day keeps the streak, the previous day extends it, anything older
/// restarts at 1. A last-active date in the future leaves everything as is.
pub fn next_streak(
    current: i32,
    longest: i32,
    last_active: Option<NaiveDate>,
    today: NaiveDate,
) -> Streak {
    let (current, last_active) = match last_active {
        None => (1, today),
        Some(last) => match (today - last).num_days() {
            d if d < 0 => (current, last),
            0 => (current.max(1), last),
            1 => (current + 1, today),
            _ => (1, today),
        },
    };

    Streak {
        current,
        longest: longest.max(current),
        last_active,
    }
}

/// Streak as it stands on `today` without recording anything: a streak whose
/// last active day is older than yesterday has already lapsed.
pub fn streak_as_of(current: i32, last_active: Option<NaiveDate>, today: NaiveDate) -> i32 {
    match last_active {
        Some(last) if (today - last).num_days() > 1 => 0,
        Some(_) => current,
        None => 0,
    }
}

/// Counters the achievements are evaluated against.
#[derive(Debug, Clone, Default, FromRow)]
pub struct AchievementStats {
    pub lessons_completed: i64,
    pub courses_completed: i64,
    pub perfect_scores: i64,
    pub posts: i64,
    pub feedbacks: i64,
    #[sqlx(skip)]
    pub current_streak: i32,
    #[sqlx(skip)]
    pub level: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Achievement {
    FirstLesson,
    LessonMarathon,
    FirstCourse,
    QuizAce,
    Streak7,
    Streak30,
    Level5,
    Level10,
    Conversationalist,
    Critic,
}

impl Achievement {
    pub const ALL: [Achievement; 10] = [
        Achievement::FirstLesson,
        Achievement::LessonMarathon,
        Achievement::FirstCourse,
        Achievement::QuizAce,
        Achievement::Streak7,
        Achievement::Streak30,
        Achievement::Level5,
        Achievement::Level10,
        Achievement::Conversationalist,
        Achievement::Critic,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Achievement::FirstLesson => "first_lesson",
            Achievement::LessonMarathon => "lesson_marathon",
            Achievement::FirstCourse => "first_course",
            Achievement::QuizAce => "quiz_ace",
            Achievement::Streak7 => "streak_7",
            Achievement::Streak30 => "streak_30",
            Achievement::Level5 => "level_5",
            Achievement::Level10 => "level_10",
            Achievement::Conversationalist => "conversationalist",
            Achievement::Critic => "critic",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Achievement::FirstLesson => "First Steps",
            Achievement::LessonMarathon => "Lesson Marathon",
            Achievement::FirstCourse => "Graduate",
            Achievement::QuizAce => "Quiz Ace",
            Achievement::Streak7 => "On Fire",
            Achievement::Streak30 => "Unstoppable",
            Achievement::Level5 => "Rising Star",
            Achievement::Level10 => "Scholar",
            Achievement::Conversationalist => "Conversationalist",
            Achievement::Critic => "Critic",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Achievement::FirstLesson => "Complete your first lesson",
            Achievement::LessonMarathon => "Complete 50 lessons",
            Achievement::FirstCourse => "Complete a whole course",
            Achievement::QuizAce => "Score 100% on a quiz",
            Achievement::Streak7 => "Learn 7 days in a row",
            Achievement::Streak30 => "Learn 30 days in a row",
            Achievement::Level5 => "Reach level 5",
            Achievement::Level10 => "Reach level 10",
            Achievement::Conversationalist => "Write 10 discussion posts or replies",
            Achievement::Critic => "Rate 5 courses",
        }
    }

    pub fn is_met(&self, stats: &AchievementStats) -> bool {
        match self {
            Achievement::FirstLesson => stats.lessons_completed >= 1,
            Achievement::LessonMarathon => stats.lessons_completed >= 50,
            Achievement::FirstCourse => stats.courses_completed >= 1,
            Achievement::QuizAce => stats.perfect_scores >= 1,
            Achievement::Streak7 => stats.current_streak >= 7,
            Achievement::Streak30 => stats.current_streak >= 30,
            Achievement::Level5 => stats.level >= 5,
            Achievement::Level10 => stats.level >= 10,
            Achievement::Conversationalist => stats.posts >= 10,
            Achievement::Critic => stats.feedbacks >= 5,
        }
    }
}

/// Achievements whose condition holds and that are not unlocked yet.
pub fn newly_unlocked(stats: &AchievementStats, unlocked: &HashSet<String>) -> Vec<Achievement> {
    Achievement::ALL
        .into_iter()
        .filter(|a| !unlocked.contains(a.code()) && a.is_met(stats))
        .collect()
}

/// What an award changed for the user.
#[derive(Debug, Clone, Default)]
pub struct AwardOutcome {
    pub points: i64,
    pub xp: i64,
    pub level: i32,
    pub leveled_up: bool,
    pub current_streak: i32,
    pub new_achievements: Vec<&'static str>,
}

#[derive(FromRow)]
struct ProgressRow {
    xp: i64,
    level: i32,
    current_streak: i32,
    longest_streak: i32,
    last_active_date: Option<NaiveDate>,
}

async fn insert_activity(
    conn: &mut PgConnection,
    user_id: i64,
    kind: ActivityKind,
    reference_id: Option<i64>,
    description: &str,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO activities (user_id, kind, points, reference_id, description)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(kind.as_str())
    .bind(kind.points())
    .bind(reference_id)
    .bind(description)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Records an activity, updates xp/level/streak and unlocks achievements.
///
/// Must run inside the caller's transaction; the user row is locked for the
/// duration of the update.
pub async fn award(
    conn: &mut PgConnection,
    user_id: i64,
    kind: ActivityKind,
    reference_id: Option<i64>,
    description: &str,
) -> Result<AwardOutcome, AppError> {
    let row = sqlx::query_as::<_, ProgressRow>(
        r#"
        SELECT xp, level, current_streak, longest_streak, last_active_date
        FROM users
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    insert_activity(conn, user_id, kind, reference_id, description).await?;

    let points = kind.points() as i64;
    let xp = row.xp + points;
    let level = level_for_xp(xp);
    let today = Utc::now().date_naive();
    let streak = next_streak(
        row.current_streak,
        row.longest_streak,
        row.last_active_date,
        today,
    );

    sqlx::query(
        r#"
        UPDATE users
        SET xp = $1, level = $2, current_streak = $3, longest_streak = $4,
            last_active_date = $5, updated_at = NOW()
        WHERE id = $6
        "#,
    )
    .bind(xp)
    .bind(level)
    .bind(streak.current)
    .bind(streak.longest)
    .bind(streak.last_active)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    let mut stats = sqlx::query_as::<_, AchievementStats>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM lesson_progress WHERE user_id = $1) AS lessons_completed,
            (SELECT COUNT(*) FROM enrollments
                WHERE user_id = $1 AND completed_at IS NOT NULL) AS courses_completed,
            (SELECT COUNT(*) FROM exam_results
                WHERE user_id = $1 AND score = 100) AS perfect_scores,
            (SELECT COUNT(*) FROM discussions WHERE user_id = $1 AND deleted_at IS NULL)
              + (SELECT COUNT(*) FROM discussion_replies
                WHERE user_id = $1 AND deleted_at IS NULL) AS posts,
            (SELECT COUNT(*) FROM feedback WHERE user_id = $1) AS feedbacks
        "#,
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;
    stats.current_streak = streak.current;
    stats.level = level;

    let unlocked: HashSet<String> =
        sqlx::query_scalar::<_, String>("SELECT code FROM user_achievements WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();

    let mut new_achievements = Vec::new();
    for achievement in newly_unlocked(&stats, &unlocked) {
        let inserted = sqlx::query(
            "INSERT INTO user_achievements (user_id, code) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(achievement.code())
        .execute(&mut *conn)
        .await?;

        if inserted.rows_affected() == 1 {
            insert_activity(
                conn,
                user_id,
                ActivityKind::AchievementUnlocked,
                None,
                &format!("Unlocked achievement: {}", achievement.title()),
            )
            .await?;
            new_achievements.push(achievement.code());
        }
    }

    if !new_achievements.is_empty() {
        tracing::info!(user_id, achievements = ?new_achievements, "Achievements unlocked");
    }

    Ok(AwardOutcome {
        points,
        xp,
        level,
        leveled_up: level > row.level,
        current_streak: streak.current,
        new_achievements,
    })
}

/// Like [`award`], but only when the ledger has no activity of this kind for
/// the same reference yet. Returns `None` when it was already awarded.
pub async fn award_once(
    conn: &mut PgConnection,
    user_id: i64,
    kind: ActivityKind,
    reference_id: i64,
    description: &str,
) -> Result<Option<AwardOutcome>, AppError> {
    // Serialize concurrent awards of the same user before checking.
    sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    let already: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM activities WHERE user_id = $1 AND kind = $2 AND reference_id = $3)",
    )
    .bind(user_id)
    .bind(kind.as_str())
    .bind(reference_id)
    .fetch_one(&mut *conn)
    .await?;

    if already {
        return Ok(None);
    }

    award(conn, user_id, kind, Some(reference_id), description)
        .await
        .map(Some)
}

/// Awards the daily-login point at most once per UTC calendar day.
pub async fn record_daily_login(
    pool: &PgPool,
    user_id: i64,
) -> Result<Option<AwardOutcome>, AppError> {
    let mut tx = pool.begin().await?;

    // Serialize concurrent logins of the same user.
    sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let already: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM activities
            WHERE user_id = $1 AND kind = $2
              AND (created_at AT TIME ZONE 'UTC')::date = (NOW() AT TIME ZONE 'UTC')::date
        )
        "#,
    )
    .bind(user_id)
    .bind(ActivityKind::DailyLogin.as_str())
    .fetch_one(&mut *tx)
    .await?;

    if already {
        tx.commit().await?;
        return Ok(None);
    }

    let outcome = award(&mut *tx, user_id, ActivityKind::DailyLogin, None, "Daily login").await?;
    tx.commit().await?;
    Ok(Some(outcome))
}

// src/models/activity.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'activities' table: the points ledger.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub points: i32,
    pub reference_id: Option<i64>,
    pub description: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Row of the xp leaderboard.
#[derive(Debug, Serialize, FromRow)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
    pub xp: i64,
    pub level: i32,
    pub current_streak: i32,
    #[serde(skip)]
    pub last_active_date: Option<chrono::NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AchievementStatus {
    pub code: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub unlocked_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Gamification overview of a user.
#[derive(Debug, Serialize)]
pub struct GamificationStats {
    pub xp: i64,
    pub level: i32,
    pub xp_into_level: i64,
    pub xp_for_next_level: i64,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_active_date: Option<chrono::NaiveDate>,
    pub achievements: Vec<AchievementStatus>,
}

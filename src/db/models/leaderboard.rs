use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fully derived leaderboard row. Never patched in place: the whole table is replaced on every
/// sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeaderboardEntry {
    pub github_username: String,
    pub fork_created_at: Option<DateTime<Utc>>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub resolution_time_hours: Option<i32>,
    pub has_fork: bool,
    pub total_score: i32,
    pub total_possible: i32,
    pub percentage: i32,
    pub assignments_completed: i32,
    pub ranking_position: i32,
}

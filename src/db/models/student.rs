use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Keyed;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct StudentId(pub Uuid);

/// Base student table model, keyed by `github_username`.
///
/// The fork timestamps here describe whichever assignment first reported a fork for this
/// student; the per-assignment values live on [`Grade`](super::grade::Grade).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Student {
    pub github_username: String,
    pub fork_created_at: Option<DateTime<Utc>>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub resolution_time_hours: Option<i32>,
    pub has_fork: bool,
}

impl Student {
    pub fn without_fork(github_username: &str) -> Self {
        Self {
            github_username: github_username.to_string(),
            fork_created_at: None,
            last_updated_at: None,
            resolution_time_hours: None,
            has_fork: false,
        }
    }
}

impl Keyed for Student {
    fn key(&self) -> String {
        self.github_username.clone()
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

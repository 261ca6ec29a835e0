use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Keyed;

/// Base grade table model; at most one row per `(github_username, assignment_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Grade {
    pub github_username: String,
    pub assignment_name: String,
    pub points_awarded: Option<i32>,
    pub fork_created_at: Option<DateTime<Utc>>,
    pub fork_updated_at: Option<DateTime<Utc>>,
}

impl Grade {
    pub fn key_of(github_username: &str, assignment_name: &str) -> (String, String) {
        (github_username.to_string(), assignment_name.to_string())
    }
}

impl Keyed for Grade {
    fn key(&self) -> String {
        format!("{}/{}", self.github_username, self.assignment_name)
    }
}

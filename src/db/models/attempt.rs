use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Keyed;
use super::assignment::AssignmentId;
use super::student::StudentId;

/// CI workflow-run statistics for one student's fork of one assignment.
///
/// `successful_attempts + failed_attempts <= total_attempts`; the remainder are runs that were
/// pending, cancelled or skipped. The first/last bounds only cover the most recent page of runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AssignmentAttempt {
    pub user_id: StudentId,
    pub assignment_id: AssignmentId,
    pub repo_url: String,
    pub total_attempts: i32,
    pub successful_attempts: i32,
    pub failed_attempts: i32,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub fork_created_at: Option<DateTime<Utc>>,
    pub fork_updated_at: Option<DateTime<Utc>>,
    pub commit_count: Option<i32>,
}

impl Keyed for AssignmentAttempt {
    fn key(&self) -> String {
        format!("{}/{}", self.user_id, self.assignment_id)
    }
}

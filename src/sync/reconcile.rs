//! Merges freshly mapped records against what the store already holds.
//!
//! Every merge keeps persisted values where the fresh record has nothing to say: absent
//! timestamps and points fall back to the stored ones and `has_fork` never goes back to
//! `false`. Records are never deleted.

use std::collections::HashMap;

use serde::Serialize;

use super::mapper::resolution_hours;
use crate::db::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Unchanged,
    Update,
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Planned<T> {
    pub record: T,
    pub change: Change,
}

fn plan<T: PartialEq>(existing: Option<&T>, record: T) -> Planned<T> {
    let change = match existing {
        None => Change::Insert,
        Some(prev) if *prev == record => Change::Unchanged,
        Some(_) => Change::Update,
    };

    Planned { record, change }
}

pub fn merge_student(existing: Option<&Student>, fetched: Student) -> Student {
    let Some(prev) = existing else {
        return fetched;
    };

    let fork_created_at = fetched.fork_created_at.or(prev.fork_created_at);
    let last_updated_at = fetched.last_updated_at.or(prev.last_updated_at);

    Student {
        resolution_time_hours: resolution_hours(fork_created_at, last_updated_at)
            .or(fetched.resolution_time_hours)
            .or(prev.resolution_time_hours),
        has_fork: fetched.has_fork || prev.has_fork,
        fork_created_at,
        last_updated_at,
        github_username: fetched.github_username,
    }
}

pub fn merge_assignment(existing: Option<&Assignment>, fetched: Assignment) -> Assignment {
    match existing {
        Some(prev) => Assignment {
            points_available: fetched.points_available.or(prev.points_available),
            name: fetched.name,
        },
        None => fetched,
    }
}

pub fn merge_grade(existing: Option<&Grade>, fetched: Grade) -> Grade {
    match existing {
        Some(prev) => Grade {
            points_awarded: fetched.points_awarded.or(prev.points_awarded),
            fork_created_at: fetched.fork_created_at.or(prev.fork_created_at),
            fork_updated_at: fetched.fork_updated_at.or(prev.fork_updated_at),
            ..fetched
        },
        None => fetched,
    }
}

/// Run counts always come from the latest fetch; timestamps and the commit count are merged.
pub fn merge_attempt(
    existing: Option<&AssignmentAttempt>,
    fetched: AssignmentAttempt,
) -> AssignmentAttempt {
    match existing {
        Some(prev) => AssignmentAttempt {
            first_attempt_at: fetched.first_attempt_at.or(prev.first_attempt_at),
            last_attempt_at: fetched.last_attempt_at.or(prev.last_attempt_at),
            fork_created_at: fetched.fork_created_at.or(prev.fork_created_at),
            fork_updated_at: fetched.fork_updated_at.or(prev.fork_updated_at),
            commit_count: fetched.commit_count.or(prev.commit_count),
            ..fetched
        },
        None => fetched,
    }
}

/// Current view of the persisted tables, kept in step with successful writes during a run.
#[derive(Debug, Default)]
pub struct Reconciler {
    students: HashMap<String, Student>,
    assignments: HashMap<String, Assignment>,
    grades: HashMap<(String, String), Grade>,
    attempts: HashMap<(StudentId, AssignmentId), AssignmentAttempt>,
}

impl Reconciler {
    #[tracing::instrument(skip(store))]
    pub async fn load(store: &dyn Store) -> StoreResult<Self> {
        let students = store.students().await?;
        let assignments = store.assignments().await?;
        let grades = store.grades().await?;
        let attempts = store.attempts().await?;

        tracing::debug!(
            students = students.len(),
            assignments = assignments.len(),
            grades = grades.len(),
            attempts = attempts.len(),
            "loaded persisted state"
        );

        Ok(Self {
            students: students
                .into_iter()
                .map(|s| (s.github_username.clone(), s))
                .collect(),
            assignments: assignments
                .into_iter()
                .map(|a| (a.name.clone(), a))
                .collect(),
            grades: grades
                .into_iter()
                .map(|g| (Grade::key_of(&g.github_username, &g.assignment_name), g))
                .collect(),
            attempts: attempts
                .into_iter()
                .map(|a| ((a.user_id, a.assignment_id), a))
                .collect(),
        })
    }

    pub fn plan_student(&self, fetched: Student) -> Planned<Student> {
        let prev = self.students.get(&fetched.github_username);
        plan(prev, merge_student(prev, fetched))
    }

    pub fn plan_assignment(&self, fetched: Assignment) -> Planned<Assignment> {
        let prev = self.assignments.get(&fetched.name);
        plan(prev, merge_assignment(prev, fetched))
    }

    pub fn plan_grade(&self, fetched: Grade) -> Planned<Grade> {
        let prev = self
            .grades
            .get(&Grade::key_of(&fetched.github_username, &fetched.assignment_name));
        plan(prev, merge_grade(prev, fetched))
    }

    pub fn plan_attempt(&self, fetched: AssignmentAttempt) -> Planned<AssignmentAttempt> {
        let prev = self.attempts.get(&(fetched.user_id, fetched.assignment_id));
        plan(prev, merge_attempt(prev, fetched))
    }

    /// Records a row the store now holds.
    pub fn accept(&mut self, row: Row<'_>) {
        match row {
            Row::Student(s) => {
                self.students.insert(s.github_username.clone(), s.clone());
            }
            Row::Assignment(a) => {
                self.assignments.insert(a.name.clone(), a.clone());
            }
            Row::Grade(g) => {
                self.grades.insert(
                    Grade::key_of(&g.github_username, &g.assignment_name),
                    g.clone(),
                );
            }
            Row::Attempt(a) => {
                self.attempts
                    .insert((a.user_id, a.assignment_id), a.clone());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    use super::*;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
    }

    fn forked(login: &str, created: u32, updated: u32) -> Student {
        Student {
            github_username: login.to_string(),
            fork_created_at: Some(ts(created)),
            last_updated_at: Some(ts(updated)),
            resolution_time_hours: Some(((updated - created) * 24) as i32),
            has_fork: true,
        }
    }

    #[test]
    fn test_student_fork_data_is_sticky() {
        let prev = forked("alice", 1, 2);
        let merged = merge_student(Some(&prev), Student::without_fork("alice"));
        assert_eq!(merged, prev);

        let newer = merge_student(Some(&prev), forked("alice", 1, 4));
        assert_eq!(newer.resolution_time_hours, Some(72));
        assert_eq!(newer.last_updated_at, Some(ts(4)));
    }

    #[test]
    fn test_grade_merge_keeps_points() {
        let prev = Grade {
            github_username: "alice".to_string(),
            assignment_name: "a1".to_string(),
            points_awarded: Some(80),
            fork_created_at: Some(ts(1)),
            fork_updated_at: Some(ts(2)),
        };
        let fetched = Grade {
            points_awarded: None,
            fork_created_at: None,
            fork_updated_at: Some(ts(3)),
            ..prev.clone()
        };

        let merged = merge_grade(Some(&prev), fetched);
        assert_eq!(merged.points_awarded, Some(80));
        assert_eq!(merged.fork_created_at, Some(ts(1)));
        assert_eq!(merged.fork_updated_at, Some(ts(3)));
    }

    #[test]
    fn test_attempt_counts_are_replaced() {
        let prev = AssignmentAttempt {
            user_id: StudentId(Uuid::nil()),
            assignment_id: AssignmentId(Uuid::nil()),
            repo_url: "https://github.com/B4OS-Dev/a1-alice".to_string(),
            total_attempts: 4,
            successful_attempts: 1,
            failed_attempts: 3,
            first_attempt_at: Some(ts(1)),
            last_attempt_at: Some(ts(2)),
            fork_created_at: Some(ts(1)),
            fork_updated_at: Some(ts(2)),
            commit_count: Some(12),
        };
        let fetched = AssignmentAttempt {
            total_attempts: 0,
            successful_attempts: 0,
            failed_attempts: 0,
            first_attempt_at: None,
            last_attempt_at: None,
            commit_count: None,
            ..prev.clone()
        };

        let merged = merge_attempt(Some(&prev), fetched);
        assert_eq!(merged.total_attempts, 0);
        assert_eq!(merged.first_attempt_at, Some(ts(1)));
        assert_eq!(merged.commit_count, Some(12));
    }

    #[test]
    fn test_plan_classifies_changes() {
        let mut reconciler = Reconciler::default();

        let first = reconciler.plan_student(forked("alice", 1, 2));
        assert_eq!(first.change, Change::Insert);
        reconciler.accept(Row::from(&first.record));

        let again = reconciler.plan_student(Student::without_fork("alice"));
        assert_eq!(again.change, Change::Unchanged);

        let moved = reconciler.plan_student(forked("alice", 1, 3));
        assert_eq!(moved.change, Change::Update);

        let assignment = Assignment {
            name: "a1".to_string(),
            points_available: Some(100),
        };
        reconciler.accept(Row::from(&assignment));
        let unknown_points = reconciler.plan_assignment(Assignment {
            points_available: None,
            ..assignment.clone()
        });
        assert_eq!(unknown_points.change, Change::Unchanged);
        assert_eq!(unknown_points.record, assignment);
    }
}

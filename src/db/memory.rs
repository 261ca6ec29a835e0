//! In-process [`Store`] used by `--dry-run` and by the pipeline tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::db::models::assignment::{Assignment, AssignmentId};
use crate::db::models::attempt::AssignmentAttempt;
use crate::db::models::grade::Grade;
use crate::db::models::leaderboard::LeaderboardEntry;
use crate::db::models::student::{Student, StudentId};
use crate::db::store::{Row, Store};
use crate::db::{StoreError, StoreResult};

/// Full table contents at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub students: BTreeMap<String, (StudentId, Student)>,
    pub assignments: BTreeMap<String, (AssignmentId, Assignment)>,
    pub grades: BTreeMap<(String, String), Grade>,
    pub attempts: BTreeMap<(StudentId, AssignmentId), AssignmentAttempt>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Debug, Default)]
struct Faults {
    conflicts: HashMap<String, usize>,
    fail_leaderboard: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Snapshot>,
    faults: Mutex<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.clone()
    }

    /// Makes the next `times` upserts of `key` fail with a unique-key conflict.
    #[cfg(test)]
    pub async fn inject_conflict(&self, key: &str, times: usize) {
        self.faults
            .lock()
            .await
            .conflicts
            .insert(key.to_string(), times);
    }

    #[cfg(test)]
    pub async fn fail_leaderboard_replace(&self) {
        self.faults.lock().await.fail_leaderboard = true;
    }

    async fn take_conflict(&self, key: &str) -> bool {
        let mut faults = self.faults.lock().await;
        match faults.conflicts.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

fn check_attempt_refs(state: &Snapshot, attempt: &AssignmentAttempt, key: String) -> StoreResult<()> {
    let has_student = state
        .students
        .values()
        .any(|(id, _)| *id == attempt.user_id);
    let has_assignment = state
        .assignments
        .values()
        .any(|(id, _)| *id == attempt.assignment_id);

    if has_student && has_assignment {
        Ok(())
    } else {
        Err(StoreError::ForeignKey {
            table: "zzz_assignment_attempts",
            key,
        })
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn students(&self) -> StoreResult<Vec<Student>> {
        let state = self.state.read().await;
        Ok(state.students.values().map(|(_, s)| s.clone()).collect())
    }

    async fn assignments(&self) -> StoreResult<Vec<Assignment>> {
        let state = self.state.read().await;
        Ok(state.assignments.values().map(|(_, a)| a.clone()).collect())
    }

    async fn grades(&self) -> StoreResult<Vec<Grade>> {
        Ok(self.state.read().await.grades.values().cloned().collect())
    }

    async fn attempts(&self) -> StoreResult<Vec<AssignmentAttempt>> {
        Ok(self.state.read().await.attempts.values().cloned().collect())
    }

    async fn leaderboard(&self) -> StoreResult<Vec<LeaderboardEntry>> {
        Ok(self.state.read().await.leaderboard.clone())
    }

    async fn student_ids(&self) -> StoreResult<HashMap<String, StudentId>> {
        let state = self.state.read().await;
        Ok(state
            .students
            .iter()
            .map(|(login, (id, _))| (login.clone(), *id))
            .collect())
    }

    async fn assignment_ids(&self) -> StoreResult<HashMap<String, AssignmentId>> {
        let state = self.state.read().await;
        Ok(state
            .assignments
            .iter()
            .map(|(name, (id, _))| (name.clone(), *id))
            .collect())
    }

    async fn upsert(&self, row: Row<'_>) -> StoreResult<()> {
        let key = row.key();
        if self.take_conflict(&key).await {
            return Err(StoreError::Conflict {
                table: row.table(),
                key,
            });
        }

        let mut state = self.state.write().await;
        match row {
            Row::Student(r) => {
                state
                    .students
                    .entry(r.github_username.clone())
                    .and_modify(|(_, existing)| *existing = r.clone())
                    .or_insert_with(|| (StudentId(Uuid::new_v4()), r.clone()));
            }
            Row::Assignment(r) => {
                state
                    .assignments
                    .entry(r.name.clone())
                    .and_modify(|(_, existing)| *existing = r.clone())
                    .or_insert_with(|| (AssignmentId(Uuid::new_v4()), r.clone()));
            }
            Row::Grade(r) => {
                state.grades.insert(
                    Grade::key_of(&r.github_username, &r.assignment_name),
                    r.clone(),
                );
            }
            Row::Attempt(r) => {
                check_attempt_refs(&state, r, key)?;
                state
                    .attempts
                    .insert((r.user_id, r.assignment_id), r.clone());
            }
        }

        Ok(())
    }

    async fn update(&self, row: Row<'_>) -> StoreResult<()> {
        let key = row.key();
        let missing = || StoreError::MissingRow {
            table: row.table(),
            key: row.key(),
        };

        let mut state = self.state.write().await;
        match row {
            Row::Student(r) => {
                let (_, existing) = state
                    .students
                    .get_mut(&r.github_username)
                    .ok_or_else(missing)?;
                *existing = r.clone();
            }
            Row::Assignment(r) => {
                let (_, existing) = state.assignments.get_mut(&r.name).ok_or_else(missing)?;
                *existing = r.clone();
            }
            Row::Grade(r) => {
                let existing = state
                    .grades
                    .get_mut(&Grade::key_of(&r.github_username, &r.assignment_name))
                    .ok_or_else(missing)?;
                *existing = r.clone();
            }
            Row::Attempt(r) => {
                check_attempt_refs(&state, r, key)?;
                let existing = state
                    .attempts
                    .get_mut(&(r.user_id, r.assignment_id))
                    .ok_or_else(missing)?;
                *existing = r.clone();
            }
        }

        Ok(())
    }

    async fn replace_leaderboard(&self, entries: &[LeaderboardEntry]) -> StoreResult<()> {
        if self.faults.lock().await.fail_leaderboard {
            return Err(StoreError::SqlxError(sqlx::Error::Protocol(
                "injected leaderboard failure".into(),
            )));
        }

        self.state.write().await.leaderboard = entries.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn attempt(user_id: StudentId, assignment_id: AssignmentId) -> AssignmentAttempt {
        AssignmentAttempt {
            user_id,
            assignment_id,
            repo_url: "https://github.com/org/a1-alice".to_string(),
            total_attempts: 3,
            successful_attempts: 1,
            failed_attempts: 2,
            first_attempt_at: None,
            last_attempt_at: None,
            fork_created_at: None,
            fork_updated_at: None,
            commit_count: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_ids_stable() {
        let store = MemoryStore::new();
        let mut alice = Student::without_fork("alice");
        store.upsert(Row::from(&alice)).await.unwrap();
        let first = store.student_ids().await.unwrap()["alice"];

        alice.has_fork = true;
        store.upsert(Row::from(&alice)).await.unwrap();
        let second = store.student_ids().await.unwrap()["alice"];

        assert_eq!(first, second);
        assert!(store.students().await.unwrap()[0].has_fork);
    }

    #[tokio::test]
    async fn test_attempt_requires_parents() {
        let store = MemoryStore::new();
        let orphan = attempt(StudentId(Uuid::new_v4()), AssignmentId(Uuid::new_v4()));
        let err = store.upsert(Row::from(&orphan)).await.unwrap_err();
        assert!(matches!(err, StoreError::ForeignKey { .. }));

        store
            .upsert(Row::from(&Student::without_fork("alice")))
            .await
            .unwrap();
        store
            .upsert(Row::from(&Assignment {
                name: "a1".to_string(),
                points_available: Some(100),
            }))
            .await
            .unwrap();

        let user_id = store.student_ids().await.unwrap()["alice"];
        let assignment_id = store.assignment_ids().await.unwrap()["a1"];
        store
            .upsert(Row::from(&attempt(user_id, assignment_id)))
            .await
            .unwrap();
        assert_eq!(store.attempts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_row() {
        let store = MemoryStore::new();
        let err = store
            .update(Row::from(&Student::without_fork("ghost")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingRow { table: "zzz_students", .. }));
    }

    #[tokio::test]
    async fn test_injected_conflict_is_consumed() {
        let store = MemoryStore::new();
        store.inject_conflict("alice", 1).await;

        let alice = Student::without_fork("alice");
        assert!(store.upsert(Row::from(&alice)).await.unwrap_err().is_conflict());
        store.upsert(Row::from(&alice)).await.unwrap();
    }
}

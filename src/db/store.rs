use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use tracing::instrument;

use crate::db::models::Keyed;
use crate::db::models::assignment::{Assignment, AssignmentId};
use crate::db::models::attempt::AssignmentAttempt;
use crate::db::models::grade::Grade;
use crate::db::models::leaderboard::LeaderboardEntry;
use crate::db::models::student::{Student, StudentId};
use crate::db::repositories::Repository;
use crate::db::repositories::assignment::AssignmentRepository;
use crate::db::repositories::attempt::AttemptRepository;
use crate::db::repositories::grade::GradeRepository;
use crate::db::repositories::leaderboard::LeaderboardRepository;
use crate::db::repositories::student::StudentRepository;
use crate::db::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Student,
    Assignment,
    Grade,
    Attempt,
}

impl Entity {
    pub fn table(&self) -> &'static str {
        match self {
            Entity::Student => "zzz_students",
            Entity::Assignment => "zzz_assignments",
            Entity::Grade => "zzz_grades",
            Entity::Attempt => "zzz_assignment_attempts",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Student => "student",
            Entity::Assignment => "assignment",
            Entity::Grade => "grade",
            Entity::Attempt => "attempt",
        };
        f.pad(name)
    }
}

/// A single keyed record headed for one of the upsertable tables.
#[derive(Debug, Clone, Copy)]
pub enum Row<'a> {
    Student(&'a Student),
    Assignment(&'a Assignment),
    Grade(&'a Grade),
    Attempt(&'a AssignmentAttempt),
}

impl Row<'_> {
    pub fn entity(&self) -> Entity {
        match self {
            Row::Student(_) => Entity::Student,
            Row::Assignment(_) => Entity::Assignment,
            Row::Grade(_) => Entity::Grade,
            Row::Attempt(_) => Entity::Attempt,
        }
    }

    pub fn table(&self) -> &'static str {
        self.entity().table()
    }

    pub fn key(&self) -> String {
        match self {
            Row::Student(r) => r.key(),
            Row::Assignment(r) => r.key(),
            Row::Grade(r) => r.key(),
            Row::Attempt(r) => r.key(),
        }
    }
}

impl<'a> From<&'a Student> for Row<'a> {
    fn from(value: &'a Student) -> Self {
        Row::Student(value)
    }
}

impl<'a> From<&'a Assignment> for Row<'a> {
    fn from(value: &'a Assignment) -> Self {
        Row::Assignment(value)
    }
}

impl<'a> From<&'a Grade> for Row<'a> {
    fn from(value: &'a Grade) -> Self {
        Row::Grade(value)
    }
}

impl<'a> From<&'a AssignmentAttempt> for Row<'a> {
    fn from(value: &'a AssignmentAttempt) -> Self {
        Row::Attempt(value)
    }
}

/// Persistence boundary for the sync run.
///
/// `upsert` and `update` are keyed writes; a unique-key race surfaces as
/// [`StoreError::Conflict`], and `update` on a key that does not exist yet as
/// [`StoreError::MissingRow`]. `replace_leaderboard` must be all-or-nothing.
#[async_trait]
pub trait Store: Send + Sync {
    async fn students(&self) -> StoreResult<Vec<Student>>;
    async fn assignments(&self) -> StoreResult<Vec<Assignment>>;
    async fn grades(&self) -> StoreResult<Vec<Grade>>;
    async fn attempts(&self) -> StoreResult<Vec<AssignmentAttempt>>;
    async fn leaderboard(&self) -> StoreResult<Vec<LeaderboardEntry>>;

    async fn student_ids(&self) -> StoreResult<HashMap<String, StudentId>>;
    async fn assignment_ids(&self) -> StoreResult<HashMap<String, AssignmentId>>;

    async fn upsert(&self, row: Row<'_>) -> StoreResult<()>;
    async fn update(&self, row: Row<'_>) -> StoreResult<()>;

    async fn replace_leaderboard(&self, entries: &[LeaderboardEntry]) -> StoreResult<()>;
}

/// Postgres-backed [`Store`] composed from the per-table repositories.
#[derive(Debug)]
pub struct PgStore {
    students: StudentRepository,
    assignments: AssignmentRepository,
    grades: GradeRepository,
    attempts: AttemptRepository,
    leaderboard: LeaderboardRepository,
}

impl PgStore {
    pub fn new(pool: &'static PgPool) -> Self {
        Self {
            students: StudentRepository::new(pool),
            assignments: AssignmentRepository::new(pool),
            grades: GradeRepository::new(pool),
            attempts: AttemptRepository::new(pool),
            leaderboard: LeaderboardRepository::new(pool),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn students(&self) -> StoreResult<Vec<Student>> {
        Ok(self.students.get_all().await?)
    }

    async fn assignments(&self) -> StoreResult<Vec<Assignment>> {
        Ok(self.assignments.get_all().await?)
    }

    async fn grades(&self) -> StoreResult<Vec<Grade>> {
        Ok(self.grades.get_all().await?)
    }

    async fn attempts(&self) -> StoreResult<Vec<AssignmentAttempt>> {
        Ok(self.attempts.get_all().await?)
    }

    async fn leaderboard(&self) -> StoreResult<Vec<LeaderboardEntry>> {
        Ok(self.leaderboard.get_all().await?)
    }

    async fn student_ids(&self) -> StoreResult<HashMap<String, StudentId>> {
        Ok(self.students.ids().await?)
    }

    async fn assignment_ids(&self) -> StoreResult<HashMap<String, AssignmentId>> {
        Ok(self.assignments.ids().await?)
    }

    #[instrument(skip(self, row), fields(table = row.table(), key = %row.key()))]
    async fn upsert(&self, row: Row<'_>) -> StoreResult<()> {
        let res = match row {
            Row::Student(r) => self.students.upsert(r).await,
            Row::Assignment(r) => self.assignments.upsert(r).await,
            Row::Grade(r) => self.grades.upsert(r).await,
            Row::Attempt(r) => self.attempts.upsert(r).await,
        };

        res.map_err(|e| StoreError::for_row(row.table(), row.key(), e))
    }

    #[instrument(skip(self, row), fields(table = row.table(), key = %row.key()))]
    async fn update(&self, row: Row<'_>) -> StoreResult<()> {
        let res = match row {
            Row::Student(r) => self.students.update(r).await,
            Row::Assignment(r) => self.assignments.update(r).await,
            Row::Grade(r) => self.grades.update(r).await,
            Row::Attempt(r) => self.attempts.update(r).await,
        };

        match res {
            Ok(0) => Err(StoreError::MissingRow {
                table: row.table(),
                key: row.key(),
            }),
            Ok(_) => Ok(()),
            Err(e) => Err(StoreError::for_row(row.table(), row.key(), e)),
        }
    }

    async fn replace_leaderboard(&self, entries: &[LeaderboardEntry]) -> StoreResult<()> {
        let removed = self.leaderboard.replace(entries).await?;
        tracing::debug!(removed, inserted = entries.len(), "leaderboard replaced");
        Ok(())
    }
}

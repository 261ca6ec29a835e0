use async_trait::async_trait;
use sqlx::{Pool, Postgres, Result as SqlxResult, Transaction};
use tracing::instrument;

use crate::db::models::Keyed;
use crate::db::models::leaderboard::LeaderboardEntry;

pub mod assignment;
pub mod attempt;
pub mod grade;
pub mod leaderboard;
pub mod student;

pub struct Tx<'a> {
    inner: Option<Transaction<'a, Postgres>>,
}

impl<'a> Tx<'a> {
    /// Runs `f` inside a transaction, committing when it returns `Ok` and rolling back
    /// otherwise.
    #[instrument(skip(pool, f))]
    pub async fn with_tx<F, Fut, T>(pool: &'static Pool<Postgres>, f: F) -> SqlxResult<T>
    where
        F: FnOnce(Tx<'a>) -> Fut,
        Fut: Future<Output = (Tx<'a>, SqlxResult<T>)>,
    {
        let tx = Self::begin(pool).await?;
        let (mut tx, result) = f(tx).await;

        match result {
            Ok(val) => {
                tx.commit().await?;
                Ok(val)
            }
            Err(e) => {
                tracing::warn!(error = ?e, "transacted query failure, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = ?rollback_err, "rollback failure");
                }
                Err(e)
            }
        }
    }

    #[instrument(skip(pool))]
    pub async fn begin(pool: &'static Pool<Postgres>) -> SqlxResult<Self> {
        let inner = pool.begin().await?;
        Ok(Self { inner: Some(inner) })
    }

    #[instrument(skip(self))]
    pub async fn commit(&mut self) -> SqlxResult<()> {
        match self.inner.take() {
            Some(tx) => tx.commit().await,
            None => Err(sqlx::Error::Protocol("Transaction already completed".into())),
        }
    }

    #[instrument(skip(self))]
    pub async fn rollback(&mut self) -> SqlxResult<()> {
        match self.inner.take() {
            Some(tx) => tx.rollback().await,
            None => Err(sqlx::Error::Protocol("Transaction already completed".into())),
        }
    }

    fn inner_mut(&mut self) -> SqlxResult<&mut Transaction<'a, Postgres>> {
        self.inner
            .as_mut()
            .ok_or_else(|| sqlx::Error::Protocol("Transaction already completed".into()))
    }

    #[instrument(skip(self))]
    pub async fn clear_leaderboard(&mut self) -> SqlxResult<u64> {
        let res = sqlx::query("DELETE FROM zzz_admin_leaderboard")
            .execute(&mut **self.inner_mut()?)
            .await?;

        Ok(res.rows_affected())
    }

    #[instrument(skip(self, entry), fields(username = %entry.github_username))]
    pub async fn insert_leaderboard_entry(&mut self, entry: &LeaderboardEntry) -> SqlxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO zzz_admin_leaderboard (
                github_username,
                fork_created_at,
                last_updated_at,
                resolution_time_hours,
                has_fork,
                total_score,
                total_possible,
                percentage,
                assignments_completed,
                ranking_position
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&entry.github_username)
        .bind(entry.fork_created_at)
        .bind(entry.last_updated_at)
        .bind(entry.resolution_time_hours)
        .bind(entry.has_fork)
        .bind(entry.total_score)
        .bind(entry.total_possible)
        .bind(entry.percentage)
        .bind(entry.assignments_completed)
        .bind(entry.ranking_position)
        .execute(&mut **self.inner_mut()?)
        .await?;

        Ok(())
    }
}

pub mod sql_fragment {
    pub const STUDENT_FIELDS: &str = r#"
        github_username,
        fork_created_at,
        last_updated_at,
        resolution_time_hours,
        has_fork
    "#;

    pub const ASSIGNMENT_FIELDS: &str = r#"
        name,
        points_available
    "#;

    pub const GRADE_FIELDS: &str = r#"
        github_username,
        assignment_name,
        points_awarded,
        fork_created_at,
        fork_updated_at
    "#;

    pub const ATTEMPT_FIELDS: &str = r#"
        user_id,
        assignment_id,
        repo_url,
        total_attempts,
        successful_attempts,
        failed_attempts,
        first_attempt_at,
        last_attempt_at,
        fork_created_at,
        fork_updated_at,
        commit_count
    "#;

    pub const LEADERBOARD_FIELDS: &str = r#"
        github_username,
        fork_created_at,
        last_updated_at,
        resolution_time_hours,
        has_fork,
        total_score,
        total_possible,
        percentage,
        assignments_completed,
        ranking_position
    "#;
}

/// Base methods shared by the per-table repositories. Writes are keyed by each table's natural
/// or composite unique key.
#[async_trait]
pub trait Repository {
    type Output: for<'r> sqlx::FromRow<'r, <Postgres as sqlx::Database>::Row>
        + Keyed
        + Sized
        + Unpin
        + Send
        + Sync
        + std::fmt::Debug;

    const BASE_FIELDS: &'static str;
    const TABLE_NAME: &'static str;
    const ORDER_BY: &'static str;

    fn new(pool: &'static Pool<Postgres>) -> Self
    where
        Self: Sized;

    fn pool(&self) -> &'static Pool<Postgres>;

    #[instrument(skip(self))]
    async fn get_all(&self) -> SqlxResult<Vec<Self::Output>> {
        sqlx::query_as::<_, Self::Output>(&format!(
            "SELECT {} FROM {} ORDER BY {}",
            Self::BASE_FIELDS,
            Self::TABLE_NAME,
            Self::ORDER_BY,
        ))
        .fetch_all(self.pool())
        .await
    }

    /// Inserts the row or overwrites the existing row with the same key.
    async fn upsert(&self, item: &Self::Output) -> SqlxResult<()>;

    /// Overwrites an existing row, returning the number of rows touched.
    async fn update(&self, item: &Self::Output) -> SqlxResult<u64>;
}

use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::attempt::AssignmentAttempt;
use crate::db::repositories::Repository;

#[derive(Debug)]
pub struct AttemptRepository {
    pool: &'static Pool<Postgres>,
}

#[async_trait::async_trait]
impl Repository for AttemptRepository {
    type Output = AssignmentAttempt;

    const BASE_FIELDS: &'static str = sql_fragment::ATTEMPT_FIELDS;
    const TABLE_NAME: &'static str = "zzz_assignment_attempts";
    const ORDER_BY: &'static str = "user_id ASC, assignment_id ASC";

    fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &'static Pool<Postgres> {
        self.pool
    }

    #[instrument(skip(self, item), fields(user_id = %item.user_id, assignment_id = %item.assignment_id))]
    async fn upsert(&self, item: &Self::Output) -> SqlxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO zzz_assignment_attempts (
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
                commit_count,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (user_id, assignment_id)
            DO UPDATE SET
                repo_url = EXCLUDED.repo_url,
                total_attempts = EXCLUDED.total_attempts,
                successful_attempts = EXCLUDED.successful_attempts,
                failed_attempts = EXCLUDED.failed_attempts,
                first_attempt_at = EXCLUDED.first_attempt_at,
                last_attempt_at = EXCLUDED.last_attempt_at,
                fork_created_at = EXCLUDED.fork_created_at,
                fork_updated_at = EXCLUDED.fork_updated_at,
                commit_count = EXCLUDED.commit_count,
                updated_at = NOW()
            "#,
        )
        .bind(item.user_id)
        .bind(item.assignment_id)
        .bind(&item.repo_url)
        .bind(item.total_attempts)
        .bind(item.successful_attempts)
        .bind(item.failed_attempts)
        .bind(item.first_attempt_at)
        .bind(item.last_attempt_at)
        .bind(item.fork_created_at)
        .bind(item.fork_updated_at)
        .bind(item.commit_count)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, item), fields(user_id = %item.user_id, assignment_id = %item.assignment_id))]
    async fn update(&self, item: &Self::Output) -> SqlxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE zzz_assignment_attempts
            SET repo_url = $3,
                total_attempts = $4,
                successful_attempts = $5,
                failed_attempts = $6,
                first_attempt_at = $7,
                last_attempt_at = $8,
                fork_created_at = $9,
                fork_updated_at = $10,
                commit_count = $11,
                updated_at = NOW()
            WHERE user_id = $1
            AND assignment_id = $2
            "#,
        )
        .bind(item.user_id)
        .bind(item.assignment_id)
        .bind(&item.repo_url)
        .bind(item.total_attempts)
        .bind(item.successful_attempts)
        .bind(item.failed_attempts)
        .bind(item.first_attempt_at)
        .bind(item.last_attempt_at)
        .bind(item.fork_created_at)
        .bind(item.fork_updated_at)
        .bind(item.commit_count)
        .execute(self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}

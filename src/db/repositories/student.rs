use std::collections::HashMap;

use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::student::{Student, StudentId};
use crate::db::repositories::Repository;

#[derive(Debug)]
pub struct StudentRepository {
    pool: &'static Pool<Postgres>,
}

impl StudentRepository {
    /// Maps each `github_username` to the surrogate id used by attempt rows.
    #[instrument(skip(self))]
    pub async fn ids(&self) -> SqlxResult<HashMap<String, StudentId>> {
        let rows = sqlx::query_as::<_, (StudentId, String)>(
            "SELECT id, github_username FROM zzz_students",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id, login)| (login, id)).collect())
    }
}

#[async_trait::async_trait]
impl Repository for StudentRepository {
    type Output = Student;

    const BASE_FIELDS: &'static str = sql_fragment::STUDENT_FIELDS;
    const TABLE_NAME: &'static str = "zzz_students";
    const ORDER_BY: &'static str = "github_username ASC";

    fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &'static Pool<Postgres> {
        self.pool
    }

    #[instrument(skip(self, item), fields(username = %item.github_username))]
    async fn upsert(&self, item: &Self::Output) -> SqlxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO zzz_students (
                github_username,
                fork_created_at,
                last_updated_at,
                resolution_time_hours,
                has_fork,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (github_username)
            DO UPDATE SET
                fork_created_at = EXCLUDED.fork_created_at,
                last_updated_at = EXCLUDED.last_updated_at,
                resolution_time_hours = EXCLUDED.resolution_time_hours,
                has_fork = EXCLUDED.has_fork,
                updated_at = NOW()
            "#,
        )
        .bind(&item.github_username)
        .bind(item.fork_created_at)
        .bind(item.last_updated_at)
        .bind(item.resolution_time_hours)
        .bind(item.has_fork)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, item), fields(username = %item.github_username))]
    async fn update(&self, item: &Self::Output) -> SqlxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE zzz_students
            SET fork_created_at = $2,
                last_updated_at = $3,
                resolution_time_hours = $4,
                has_fork = $5,
                updated_at = NOW()
            WHERE github_username = $1
            "#,
        )
        .bind(&item.github_username)
        .bind(item.fork_created_at)
        .bind(item.last_updated_at)
        .bind(item.resolution_time_hours)
        .bind(item.has_fork)
        .execute(self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}

use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::grade::Grade;
use crate::db::repositories::Repository;

#[derive(Debug)]
pub struct GradeRepository {
    pool: &'static Pool<Postgres>,
}

#[async_trait::async_trait]
impl Repository for GradeRepository {
    type Output = Grade;

    const BASE_FIELDS: &'static str = sql_fragment::GRADE_FIELDS;
    const TABLE_NAME: &'static str = "zzz_grades";
    const ORDER_BY: &'static str = "github_username ASC, assignment_name ASC";

    fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &'static Pool<Postgres> {
        self.pool
    }

    #[instrument(skip(self, item), fields(username = %item.github_username, assignment = %item.assignment_name))]
    async fn upsert(&self, item: &Self::Output) -> SqlxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO zzz_grades (
                github_username,
                assignment_name,
                points_awarded,
                fork_created_at,
                fork_updated_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (github_username, assignment_name)
            DO UPDATE SET
                points_awarded = EXCLUDED.points_awarded,
                fork_created_at = EXCLUDED.fork_created_at,
                fork_updated_at = EXCLUDED.fork_updated_at,
                updated_at = NOW()
            "#,
        )
        .bind(&item.github_username)
        .bind(&item.assignment_name)
        .bind(item.points_awarded)
        .bind(item.fork_created_at)
        .bind(item.fork_updated_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, item), fields(username = %item.github_username, assignment = %item.assignment_name))]
    async fn update(&self, item: &Self::Output) -> SqlxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE zzz_grades
            SET points_awarded = $3,
                fork_created_at = $4,
                fork_updated_at = $5,
                updated_at = NOW()
            WHERE github_username = $1
            AND assignment_name = $2
            "#,
        )
        .bind(&item.github_username)
        .bind(&item.assignment_name)
        .bind(item.points_awarded)
        .bind(item.fork_created_at)
        .bind(item.fork_updated_at)
        .execute(self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}

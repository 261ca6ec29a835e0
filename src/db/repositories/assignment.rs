use std::collections::HashMap;

use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::assignment::{Assignment, AssignmentId};
use crate::db::repositories::Repository;

#[derive(Debug)]
pub struct AssignmentRepository {
    pool: &'static Pool<Postgres>,
}

impl AssignmentRepository {
    #[instrument(skip(self))]
    pub async fn ids(&self) -> SqlxResult<HashMap<String, AssignmentId>> {
        let rows =
            sqlx::query_as::<_, (AssignmentId, String)>("SELECT id, name FROM zzz_assignments")
                .fetch_all(self.pool)
                .await?;

        Ok(rows.into_iter().map(|(id, name)| (name, id)).collect())
    }
}

#[async_trait::async_trait]
impl Repository for AssignmentRepository {
    type Output = Assignment;

    const BASE_FIELDS: &'static str = sql_fragment::ASSIGNMENT_FIELDS;
    const TABLE_NAME: &'static str = "zzz_assignments";
    const ORDER_BY: &'static str = "name ASC";

    fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &'static Pool<Postgres> {
        self.pool
    }

    #[instrument(skip(self, item), fields(name = %item.name))]
    async fn upsert(&self, item: &Self::Output) -> SqlxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO zzz_assignments (name, points_available, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (name)
            DO UPDATE SET
                points_available = EXCLUDED.points_available,
                updated_at = NOW()
            "#,
        )
        .bind(&item.name)
        .bind(item.points_available)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, item), fields(name = %item.name))]
    async fn update(&self, item: &Self::Output) -> SqlxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE zzz_assignments
            SET points_available = $2,
                updated_at = NOW()
            WHERE name = $1
            "#,
        )
        .bind(&item.name)
        .bind(item.points_available)
        .execute(self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}

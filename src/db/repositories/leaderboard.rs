use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::{Tx, sql_fragment};
use crate::db::models::leaderboard::LeaderboardEntry;

#[derive(Debug)]
pub struct LeaderboardRepository {
    pool: &'static Pool<Postgres>,
}

impl LeaderboardRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn get_all(&self) -> SqlxResult<Vec<LeaderboardEntry>> {
        sqlx::query_as::<_, LeaderboardEntry>(&format!(
            "SELECT {} FROM zzz_admin_leaderboard ORDER BY ranking_position ASC",
            sql_fragment::LEADERBOARD_FIELDS,
        ))
        .fetch_all(self.pool)
        .await
    }

    /// Swaps the whole table for `entries` in one transaction; readers see either the old
    /// leaderboard or the new one. Returns the number of rows removed.
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn replace(&self, entries: &[LeaderboardEntry]) -> SqlxResult<u64> {
        let result = Tx::with_tx(self.pool, |mut tx| async move {
            let result = async {
                let removed = tx.clear_leaderboard().await?;
                for entry in entries {
                    tx.insert_leaderboard_entry(entry).await?;
                }

                Ok::<_, sqlx::Error>(removed)
            }
            .await;

            (tx, result)
        })
        .await;

        if let Err(e) = &result {
            tracing::error!(error = ?e, "leaderboard replace failure");
        }

        result
    }
}

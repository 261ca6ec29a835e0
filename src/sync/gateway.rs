use tracing::instrument;

use super::reconcile::{Change, Planned};
use super::summary::{FailureKind, Outcome, SyncSummary};
use crate::db::prelude::*;

/// Row-at-a-time writes with per-row failure isolation. Only failures to reach the store at all
/// are returned; everything else is recorded on the summary and skipped.
pub struct Gateway<'a> {
    store: &'a dyn Store,
}

impl<'a> Gateway<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Writes `planned` if it changed, returning what happened to it.
    pub async fn write<T>(
        &self,
        planned: &Planned<T>,
        summary: &mut SyncSummary,
    ) -> StoreResult<Outcome>
    where
        for<'r> Row<'r>: From<&'r T>,
    {
        let row = Row::from(&planned.record);

        let outcome = match planned.change {
            Change::Unchanged => Outcome::Unchanged,
            Change::Insert => self.upsert(row, Outcome::Inserted, summary).await?,
            Change::Update => self.upsert(row, Outcome::Updated, summary).await?,
        };

        summary.record(row.entity(), row.key(), outcome);
        Ok(outcome)
    }

    #[instrument(skip(self, row, summary), fields(table = row.table(), key = %row.key()))]
    async fn upsert(
        &self,
        row: Row<'_>,
        written: Outcome,
        summary: &mut SyncSummary,
    ) -> StoreResult<Outcome> {
        match self.store.upsert(row).await {
            Ok(()) => Ok(written),
            Err(e) if e.is_connection() => Err(e),
            Err(e) if e.is_conflict() => {
                tracing::warn!(error = %e, "duplicate key on upsert, retrying as update");

                match self.store.update(row).await {
                    Ok(()) => Ok(Outcome::Updated),
                    Err(e) if e.is_connection() => Err(e),
                    Err(e) => {
                        tracing::warn!(error = %e, "update after conflict failed, skipping row");
                        summary.fail(FailureKind::Conflict, row.key(), &e);
                        Ok(Outcome::Skipped)
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "upsert failure, skipping row");
                summary.fail(FailureKind::Upsert, row.key(), &e);
                Ok(Outcome::Skipped)
            }
        }
    }

    /// Swaps in the new leaderboard; all-or-nothing.
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn replace_leaderboard(&self, entries: &[LeaderboardEntry]) -> StoreResult<()> {
        self.store.replace_leaderboard(entries).await
    }
}

use std::sync::LazyLock;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::constants::DB_MAX_CONNECTIONS;

pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

pub mod prelude {
    pub use crate::db::models::Keyed;
    pub use crate::db::models::assignment::{Assignment, AssignmentId};
    pub use crate::db::models::attempt::AssignmentAttempt;
    pub use crate::db::models::grade::Grade;
    pub use crate::db::models::leaderboard::LeaderboardEntry;
    pub use crate::db::models::student::{Student, StudentId};

    pub use crate::db::memory::MemoryStore;
    pub use crate::db::store::{Entity, PgStore, Row, Store};
    pub use crate::db::StoreResult;
}

static DB_POOL: LazyLock<OnceCell<PgPool>> = LazyLock::new(OnceCell::new);

/// Returns the process-wide Postgres pool, connecting on first use.
pub async fn db_pool(database_url: &str) -> StoreResult<&'static PgPool> {
    DB_POOL
        .get_or_try_init(|| async {
            PgPoolOptions::new()
                .max_connections(DB_MAX_CONNECTIONS)
                .connect(database_url)
                .await
                .map_err(StoreError::Connect)
        })
        .await
}

/// Applies the embedded schema migrations.
pub async fn migrate(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub type StoreResult<T> = core::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unable to connect to the store: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("duplicate key in {table} for '{key}'")]
    Conflict { table: &'static str, key: String },

    #[error("missing referenced row for {table} '{key}'")]
    ForeignKey { table: &'static str, key: String },

    #[error("no existing row in {table} for '{key}'")]
    MissingRow { table: &'static str, key: String },

    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Classifies a query failure for a single keyed row, surfacing unique and foreign key
    /// violations so callers can treat them as per-row conditions.
    pub fn for_row(table: &'static str, key: String, err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => StoreError::Conflict { table, key },
            Some(db_err) if db_err.is_foreign_key_violation() => {
                StoreError::ForeignKey { table, key }
            }
            _ => StoreError::SqlxError(err),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Failures reaching the store at all, as opposed to a single row being rejected.
    pub fn is_connection(&self) -> bool {
        match self {
            StoreError::Connect(_) => true,
            StoreError::SqlxError(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Configuration(_)
            ),
            _ => false,
        }
    }
}

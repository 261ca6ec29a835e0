//! The classroom → database sync pipeline.

use thiserror::Error;

use crate::db::StoreError;
use crate::github::GithubErr;

pub mod aggregate;
pub mod config;
pub mod gateway;
pub mod mapper;
pub mod orchestrator;
pub mod reconcile;
pub mod state;
pub mod summary;


pub use orchestrator::Orchestrator;

pub type SyncResult<T> = core::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("classroom '{0}' not found")]
    ClassroomNotFound(String),

    #[error("assignment id '{0}' is not part of the classroom")]
    AssignmentNotFound(String),

    #[error("assignment title '{0}' has no usable characters")]
    EmptyAssignmentName(String),

    #[error(transparent)]
    Github(#[from] GithubErr),

    #[error(transparent)]
    Mapping(#[from] mapper::MapErr),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Whether the error ends the run. Anything scoped to a single assignment, repository or
    /// row is recorded on the summary instead.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::ClassroomNotFound(_) | SyncError::AssignmentNotFound(_) => true,
            SyncError::Github(e) => e.is_fatal(),
            SyncError::Store(e) => e.is_connection(),
            SyncError::Mapping(_) | SyncError::EmptyAssignmentName(_) => false,
        }
    }
}

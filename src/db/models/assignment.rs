use core::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Keyed;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct AssignmentId(pub Uuid);

/// Base assignment table model, keyed by the slugified `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Assignment {
    pub name: String,
    pub points_available: Option<i32>,
}

impl Keyed for Assignment {
    fn key(&self) -> String {
        self.name.clone()
    }
}

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

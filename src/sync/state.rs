use core::fmt;

use serde::Serialize;

/// Step within one assignment's processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    FetchGrades,
    EnrichRepos,
    FetchAttempts,
    Persist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SyncState {
    Idle,
    FetchingClassroom,
    FetchingAssignments,
    ProcessingAssignment { index: usize, phase: Phase },
    Aggregating,
    PersistingLeaderboard,
    Done,
    Errored,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::FetchGrades => "FETCH_GRADES",
            Phase::EnrichRepos => "ENRICH_REPOS",
            Phase::FetchAttempts => "FETCH_ATTEMPTS",
            Phase::Persist => "PERSIST",
        };
        f.write_str(name)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => f.write_str("IDLE"),
            SyncState::FetchingClassroom => f.write_str("FETCHING_CLASSROOM"),
            SyncState::FetchingAssignments => f.write_str("FETCHING_ASSIGNMENTS"),
            SyncState::ProcessingAssignment { index, phase } => {
                write!(f, "PROCESSING_ASSIGNMENT[{index}]:{phase}")
            }
            SyncState::Aggregating => f.write_str("AGGREGATING"),
            SyncState::PersistingLeaderboard => f.write_str("PERSISTING_LEADERBOARD"),
            SyncState::Done => f.write_str("DONE"),
            SyncState::Errored => f.write_str("ERRORED"),
        }
    }
}

pub mod assignment;
pub mod attempt;
pub mod grade;
pub mod leaderboard;
pub mod student;

/// Natural key of a persisted record, used for logging and failure reporting.
pub trait Keyed {
    fn key(&self) -> String;
}

use core::fmt;
use std::collections::BTreeMap;

use serde::Serialize;

use super::state::SyncState;
use crate::db::prelude::Entity;

/// What happened to one record over the whole run. When a record is touched more than once,
/// the strongest outcome is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Unchanged,
    Skipped,
    Updated,
    Inserted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Grades for a whole assignment could not be fetched or parsed.
    Assignment,
    /// Repository metadata could not be fetched.
    Enrichment,
    WorkflowRuns,
    Upsert,
    Conflict,
    /// An attempt whose student or assignment row is not in the store.
    MissingReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    PointsFallback,
    NameReformatted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub subject: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub classroom: String,
    pub state: SyncState,
    pub assignments_processed: usize,
    pub leaderboard_entries: usize,
    pub failures: Vec<Failure>,
    pub warnings: BTreeMap<WarningKind, usize>,
    #[serde(skip)]
    outcomes: BTreeMap<Entity, BTreeMap<String, Outcome>>,
}

impl SyncSummary {
    pub fn new(classroom: &str) -> Self {
        Self {
            classroom: classroom.to_string(),
            state: SyncState::Idle,
            assignments_processed: 0,
            leaderboard_entries: 0,
            failures: Vec::new(),
            warnings: BTreeMap::new(),
            outcomes: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, entity: Entity, key: String, outcome: Outcome) {
        self.outcomes
            .entry(entity)
            .or_default()
            .entry(key)
            .and_modify(|prev| *prev = (*prev).max(outcome))
            .or_insert(outcome);
    }

    pub fn fail(&mut self, kind: FailureKind, subject: impl Into<String>, reason: impl fmt::Display) {
        self.failures.push(Failure {
            kind,
            subject: subject.into(),
            reason: reason.to_string(),
        });
    }

    pub fn warn(&mut self, kind: WarningKind) {
        *self.warnings.entry(kind).or_default() += 1;
    }

    pub fn counts(&self, entity: Entity) -> EntityCounts {
        let mut counts = EntityCounts::default();
        for outcome in self.outcomes.get(&entity).into_iter().flat_map(|m| m.values()) {
            match outcome {
                Outcome::Inserted => counts.inserted += 1,
                Outcome::Updated => counts.updated += 1,
                Outcome::Unchanged => counts.unchanged += 1,
                Outcome::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    pub fn failure_count(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }

    pub fn warning_count(&self, kind: WarningKind) -> usize {
        self.warnings.get(&kind).copied().unwrap_or_default()
    }

    /// Per-entity counts in table order, for structured output.
    pub fn entity_counts(&self) -> BTreeMap<Entity, EntityCounts> {
        [
            Entity::Student,
            Entity::Assignment,
            Entity::Grade,
            Entity::Attempt,
        ]
        .into_iter()
        .map(|entity| (entity, self.counts(entity)))
        .collect()
    }

    /// Emits the summary as a single structured event.
    pub fn log(&self) {
        let failures: BTreeMap<FailureKind, usize> =
            self.failures.iter().fold(BTreeMap::new(), |mut acc, f| {
                *acc.entry(f.kind).or_default() += 1;
                acc
            });

        tracing::info!(
            classroom = %self.classroom,
            state = %self.state,
            assignments = self.assignments_processed,
            leaderboard_entries = self.leaderboard_entries,
            entities = ?self.entity_counts(),
            failures = ?failures,
            warnings = ?self.warnings,
            "sync summary"
        );
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "classroom sync '{}' finished in state {}", self.classroom, self.state)?;
        writeln!(f, "  assignments processed: {}", self.assignments_processed)?;

        for (entity, c) in self.entity_counts() {
            writeln!(
                f,
                "  {entity:<11} inserted {:>4}  updated {:>4}  unchanged {:>4}  skipped {:>4}",
                c.inserted, c.updated, c.unchanged, c.skipped
            )?;
        }
        writeln!(f, "  leaderboard entries: {}", self.leaderboard_entries)?;

        if !self.warnings.is_empty() {
            writeln!(f, "  warnings:")?;
            for (kind, count) in &self.warnings {
                writeln!(f, "    {kind:?}: {count}")?;
            }
        }

        if self.failures.is_empty() {
            write!(f, "  no failures")
        } else {
            write!(f, "  failures ({}):", self.failures.len())?;
            for failure in &self.failures {
                write!(
                    f,
                    "\n    [{:?}] {}: {}",
                    failure.kind, failure.subject, failure.reason
                )?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_strongest_outcome_wins() {
        let mut summary = SyncSummary::new("B4OS-Dev-2025");
        summary.record(Entity::Student, "alice".into(), Outcome::Inserted);
        summary.record(Entity::Student, "alice".into(), Outcome::Unchanged);
        summary.record(Entity::Student, "bob".into(), Outcome::Unchanged);
        summary.record(Entity::Student, "bob".into(), Outcome::Updated);
        summary.record(Entity::Grade, "bob/a1".into(), Outcome::Skipped);

        assert_eq!(
            summary.counts(Entity::Student),
            EntityCounts {
                inserted: 1,
                updated: 1,
                unchanged: 0,
                skipped: 0
            }
        );
        assert_eq!(summary.counts(Entity::Grade).skipped, 1);
        assert_eq!(summary.counts(Entity::Attempt), EntityCounts::default());
    }

    #[test]
    fn test_display_lists_failures() {
        let mut summary = SyncSummary::new("B4OS-Dev-2025");
        summary.fail(FailureKind::Enrichment, "bob@a2", "no response within 30s");
        summary.warn(WarningKind::PointsFallback);

        let text = summary.to_string();
        assert!(text.contains("failures (1)"));
        assert!(text.contains("[Enrichment] bob@a2"));
        assert!(text.contains("PointsFallback: 1"));
        assert_eq!(summary.failure_count(FailureKind::Enrichment), 1);
        assert_eq!(summary.warning_count(WarningKind::NameReformatted), 0);
    }
}

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::instrument;

use super::aggregate::build_leaderboard;
use super::config::SyncConfig;
use super::gateway::Gateway;
use super::mapper::{
    self, AssignmentRow, GradeRow, PendingAttempt, aggregate_runs, assignment_from_grades,
    format_assignment_name, grade_from_row, student_from_repo,
};
use super::reconcile::{Planned, Reconciler};
use super::state::{Phase, SyncState};
use super::summary::{FailureKind, Outcome, SyncSummary, WarningKind};
use super::{SyncError, SyncResult};
use crate::db::prelude::*;
use crate::github::fetcher::RepoFetcher;
use crate::github::{ClassroomSource, RepoInfo, RepoRef, RepoSource};

/// Drives one sync run through its states.
///
/// Failures scoped to an assignment, repository or row are recorded on the summary and the run
/// carries on. Failures before the assignment loop, fatal errors inside it, and any failure to
/// build or store the leaderboard end the run in `Errored` without touching the leaderboard.
pub struct Orchestrator<'a> {
    config: &'a SyncConfig,
    classroom: &'a dyn ClassroomSource,
    repos: &'a dyn RepoSource,
    store: &'a dyn Store,
    state: SyncState,
    summary: SyncSummary,
}

/// Per-run view of the students seen so far. The first fork reported for a student supplies
/// their student-level fork data.
type Roster = BTreeMap<String, Student>;

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a SyncConfig,
        classroom: &'a dyn ClassroomSource,
        repos: &'a dyn RepoSource,
        store: &'a dyn Store,
    ) -> Self {
        Self {
            config,
            classroom,
            repos,
            store,
            state: SyncState::Idle,
            summary: SyncSummary::new(&config.classroom_name),
        }
    }

    #[instrument(skip(self), fields(classroom = %self.config.classroom_name))]
    pub async fn run(mut self) -> SyncResult<SyncSummary> {
        match self.execute().await {
            Ok(()) => {
                self.transition(SyncState::Done);
                self.summary.log();
                Ok(self.summary)
            }
            Err(e) => {
                tracing::error!(error = %e, state = %self.state, "sync aborted");
                self.transition(SyncState::Errored);
                self.summary.log();
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: SyncState) {
        match next {
            SyncState::ProcessingAssignment { .. } => {
                tracing::debug!(from = %self.state, to = %next, "state transition")
            }
            _ => tracing::info!(from = %self.state, to = %next, "state transition"),
        }

        self.state = next;
        self.summary.state = next;
    }

    async fn execute(&mut self) -> SyncResult<()> {
        self.repos.verify_credentials().await?;

        self.transition(SyncState::FetchingClassroom);
        let classroom_id = self.resolve_classroom().await?;

        self.transition(SyncState::FetchingAssignments);
        let assignments = self.assignments(&classroom_id).await?;

        let mut reconciler = Reconciler::load(self.store).await?;
        let mut roster = Roster::new();
        let fetcher = RepoFetcher::new(self.repos, self.config.timeout);

        for (index, assignment) in assignments.iter().enumerate() {
            let result = self
                .process_assignment(index, assignment, &fetcher, &mut reconciler, &mut roster)
                .await;

            match result {
                Ok(()) => self.summary.assignments_processed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        assignment = %assignment.title,
                        id = %assignment.id,
                        error = %e,
                        "skipping assignment"
                    );
                    self.summary
                        .fail(FailureKind::Assignment, assignment.title.as_str(), &e);
                }
            }
        }

        self.transition(SyncState::Aggregating);
        let students = self.store.students().await?;
        let catalog = self.store.assignments().await?;
        let grades = self.store.grades().await?;
        let entries = build_leaderboard(&students, &catalog, &grades);

        if let Some(entry) = entries
            .iter()
            .find(|e| self.config.is_tracked(&e.github_username))
        {
            tracing::info!(
                tracked = true,
                username = %entry.github_username,
                rank = entry.ranking_position,
                percentage = entry.percentage,
                total_score = entry.total_score,
                "tracked student ranking"
            );
        }

        self.transition(SyncState::PersistingLeaderboard);
        Gateway::new(self.store)
            .replace_leaderboard(&entries)
            .await?;
        self.summary.leaderboard_entries = entries.len();

        Ok(())
    }

    #[instrument(skip(self))]
    async fn resolve_classroom(&self) -> SyncResult<String> {
        let listing = self.classroom.list_classrooms().await?;
        let classrooms = mapper::parse_classroom_list(&listing)?;

        let found = classrooms
            .into_iter()
            .find(|c| c.name == self.config.classroom_name)
            .ok_or_else(|| SyncError::ClassroomNotFound(self.config.classroom_name.clone()))?;

        tracing::info!(id = %found.id, "found classroom");
        Ok(found.id)
    }

    #[instrument(skip(self))]
    async fn assignments(&self, classroom_id: &str) -> SyncResult<Vec<AssignmentRow>> {
        let listing = self.classroom.list_assignments(classroom_id).await?;
        let assignments = mapper::parse_assignment_list(&listing);

        match &self.config.assignment_id {
            Some(id) => {
                let single: Vec<_> = assignments.into_iter().filter(|a| &a.id == id).collect();
                if single.is_empty() {
                    return Err(SyncError::AssignmentNotFound(id.clone()));
                }

                tracing::info!(id = %id, "single-assignment sync");
                Ok(single)
            }
            None => {
                tracing::info!(count = assignments.len(), "full sync");
                Ok(assignments)
            }
        }
    }

    #[instrument(skip_all, fields(index = index, assignment = %assignment.title))]
    async fn process_assignment(
        &mut self,
        index: usize,
        assignment: &AssignmentRow,
        fetcher: &RepoFetcher<'_>,
        reconciler: &mut Reconciler,
        roster: &mut Roster,
    ) -> SyncResult<()> {
        self.transition(SyncState::ProcessingAssignment {
            index,
            phase: Phase::FetchGrades,
        });

        let name = format_assignment_name(&assignment.title);
        if name.is_empty() {
            return Err(SyncError::EmptyAssignmentName(assignment.title.clone()));
        }
        if name != assignment.title {
            self.summary.warn(WarningKind::NameReformatted);
            tracing::info!(title = %assignment.title, name = %name, "assignment name reformatted");
        }

        let export = self.classroom.assignment_grades(&assignment.id).await?;
        let rows = mapper::parse_grades_csv(&export)?;
        tracing::info!(students = rows.len(), "fetched grades");

        let (record, fallback) = assignment_from_grades(&name, &rows);
        if let Some(fallback) = fallback {
            self.summary.warn(WarningKind::PointsFallback);
            tracing::warn!(
                assignment = %name,
                ?fallback,
                points_available = ?record.points_available,
                "points_available fallback applied"
            );
        }

        self.transition(SyncState::ProcessingAssignment {
            index,
            phase: Phase::EnrichRepos,
        });
        let infos = self.enrich(&name, &rows, fetcher).await?;

        let mut touched = BTreeSet::new();
        let mut grades = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let info = infos.get(&idx).map(|(_, info)| info);
            let login = row.github_username.trim();
            let fetched = student_from_repo(login, info);

            let keep_known = roster
                .get(login)
                .is_some_and(|known| known.has_fork || !fetched.has_fork);
            if !keep_known {
                roster.insert(login.to_string(), fetched);
            }
            touched.insert(login.to_string());

            let grade = grade_from_row(row, &name, info);
            if self.config.is_tracked(login) {
                tracing::info!(
                    tracked = true,
                    username = login,
                    assignment = %name,
                    points = ?grade.points_awarded,
                    fork = info.is_some_and(|i| i.fork),
                    "tracked student grade"
                );
            }
            grades.push(grade);
        }

        self.transition(SyncState::ProcessingAssignment {
            index,
            phase: Phase::FetchAttempts,
        });
        let pending = self.attempts(&name, &rows, &infos, fetcher).await?;

        self.transition(SyncState::ProcessingAssignment {
            index,
            phase: Phase::Persist,
        });
        let gateway = Gateway::new(self.store);

        let planned = reconciler.plan_assignment(record);
        self.persist(&gateway, reconciler, planned).await?;

        for login in &touched {
            if let Some(student) = roster.get(login) {
                let planned = reconciler.plan_student(student.clone());
                self.persist(&gateway, reconciler, planned).await?;
            }
        }

        for grade in grades {
            let planned = reconciler.plan_grade(grade);
            self.persist(&gateway, reconciler, planned).await?;
        }

        if !pending.is_empty() {
            let student_ids = self.store.student_ids().await?;
            let assignment_ids = self.store.assignment_ids().await?;

            for attempt in pending {
                let ids = (
                    student_ids.get(&attempt.github_username),
                    assignment_ids.get(&attempt.assignment_name),
                );

                match ids {
                    (Some(user_id), Some(assignment_id)) => {
                        let planned =
                            reconciler.plan_attempt(attempt.resolve(*user_id, *assignment_id));
                        self.persist(&gateway, reconciler, planned).await?;
                    }
                    _ => {
                        let subject =
                            format!("{}@{}", attempt.github_username, attempt.assignment_name);
                        tracing::warn!(subject = %subject, "attempt references a missing row, skipping");
                        self.summary.fail(
                            FailureKind::MissingReference,
                            subject.as_str(),
                            "student or assignment row not stored",
                        );
                        self.summary.record(Entity::Attempt, subject, Outcome::Skipped);
                    }
                }
            }
        }

        Ok(())
    }

    /// Repository metadata for every row with a usable repository URL, keyed by row index.
    async fn enrich(
        &mut self,
        name: &str,
        rows: &[GradeRow],
        fetcher: &RepoFetcher<'_>,
    ) -> SyncResult<HashMap<usize, (RepoRef, RepoInfo)>> {
        let mut targets = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            let Some(url) = row.repo_url() else {
                continue;
            };

            match RepoRef::parse(url) {
                Ok(repo) => targets.push((idx, repo)),
                Err(e) => {
                    tracing::warn!(url, error = %e, "unusable repository url");
                    self.summary
                        .fail(FailureKind::Enrichment, subject(row, name), &e);
                }
            }
        }

        let repos: Vec<RepoRef> = targets.iter().map(|(_, repo)| repo.clone()).collect();
        let results = fetcher.repo_infos(&repos).await;

        let mut infos = HashMap::with_capacity(targets.len());
        for ((idx, repo), result) in targets.into_iter().zip(results) {
            match result {
                Ok(info) => {
                    infos.insert(idx, (repo, info));
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(repo = %repo, error = %e, "skipping repository enrichment");
                    self.summary
                        .fail(FailureKind::Enrichment, subject(&rows[idx], name), &e);
                }
            }
        }

        tracing::debug!(
            enriched = infos.len(),
            forks = infos.values().filter(|(_, info)| info.fork).count(),
            "repository enrichment complete"
        );
        Ok(infos)
    }

    /// Workflow-run statistics for fork repositories. A fork whose runs cannot be fetched gets
    /// no attempt record; a missing commit count is only logged.
    async fn attempts(
        &mut self,
        name: &str,
        rows: &[GradeRow],
        infos: &HashMap<usize, (RepoRef, RepoInfo)>,
        fetcher: &RepoFetcher<'_>,
    ) -> SyncResult<Vec<PendingAttempt>> {
        let mut forks: Vec<(usize, &RepoRef, &RepoInfo)> = infos
            .iter()
            .filter(|(_, (_, info))| info.fork)
            .map(|(idx, (repo, info))| (*idx, repo, info))
            .collect();
        forks.sort_by_key(|(idx, _, _)| *idx);

        let repos: Vec<RepoRef> = forks.iter().map(|(_, repo, _)| (*repo).clone()).collect();
        let runs = fetcher.workflow_runs(&repos).await;
        let commits = fetcher.commit_counts(&repos).await;

        let mut pending = Vec::with_capacity(forks.len());
        for (((idx, repo, info), runs), commits) in forks.into_iter().zip(runs).zip(commits) {
            let row = &rows[idx];

            let runs = match runs {
                Ok(runs) => runs,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(repo = %repo, error = %e, "skipping workflow runs");
                    self.summary
                        .fail(FailureKind::WorkflowRuns, subject(row, name), &e);
                    continue;
                }
            };

            let commit_count = match commits {
                Ok(count) => i32::try_from(count).ok(),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::debug!(repo = %repo, error = %e, "commit count unavailable");
                    None
                }
            };

            let login = row.github_username.trim();
            let stats = aggregate_runs(&runs);
            if self.config.is_tracked(login) {
                tracing::info!(
                    tracked = true,
                    username = login,
                    assignment = name,
                    total = stats.total,
                    successful = stats.successful,
                    failed = stats.failed,
                    "tracked student attempts"
                );
            }

            pending.push(PendingAttempt {
                github_username: login.to_string(),
                assignment_name: name.to_string(),
                repo_url: row.repo_url().unwrap_or_default().to_string(),
                stats,
                fork_created_at: info.created_at,
                fork_updated_at: info.updated_at,
                commit_count,
            });
        }

        Ok(pending)
    }

    async fn persist<T>(
        &mut self,
        gateway: &Gateway<'_>,
        reconciler: &mut Reconciler,
        planned: Planned<T>,
    ) -> SyncResult<()>
    where
        for<'r> Row<'r>: From<&'r T>,
    {
        let outcome = gateway.write(&planned, &mut self.summary).await?;
        if outcome != Outcome::Skipped {
            reconciler.accept(Row::from(&planned.record));
        }

        Ok(())
    }
}

fn subject(row: &GradeRow, assignment: &str) -> String {
    format!("{}@{}", row.github_username.trim(), assignment)
}

//! Pure conversions from raw classroom/API payloads into domain records.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::constants::{
    ASSIGNMENT_ROW_MIN_FIELDS, CLI_HEADER_LINES, PART_TWO_DEFAULT_POINTS, PART_TWO_PATTERN,
};
use crate::db::prelude::*;
use crate::github::{RepoInfo, WorkflowRuns};

const REQUIRED_GRADE_COLUMNS: [&str; 3] = ["github_username", "points_awarded", "points_available"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassroomRow {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRow {
    pub id: String,
    pub title: String,
    pub template_repo: String,
}

/// One row of a `gh classroom assignment-grades` export.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GradeRow {
    pub github_username: String,
    #[serde(default)]
    pub student_repository_url: Option<String>,
    pub points_awarded: Option<f64>,
    pub points_available: Option<f64>,
}

impl GradeRow {
    pub fn points_awarded(&self) -> Option<i32> {
        self.points_awarded.map(points)
    }

    pub fn repo_url(&self) -> Option<&str> {
        self.student_repository_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[inline]
fn points(value: f64) -> i32 {
    value.trunc() as i32
}

pub fn parse_classroom_list(output: &str) -> MapResult<Vec<ClassroomRow>> {
    let lines: Vec<&str> = output.trim().lines().collect();
    if lines.len() <= CLI_HEADER_LINES {
        return Err(MapErr::ShortClassroomList { lines: lines.len() });
    }

    let rows = lines[CLI_HEADER_LINES..]
        .iter()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = if line.contains('\t') {
                line.split('\t').map(str::trim).collect()
            } else {
                line.split_whitespace().collect()
            };

            match fields.as_slice() {
                [id, name, ..] if !id.is_empty() => Some(ClassroomRow {
                    id: id.to_string(),
                    name: name.to_string(),
                }),
                _ => None,
            }
        })
        .collect();

    Ok(rows)
}

pub fn parse_assignment_list(output: &str) -> Vec<AssignmentRow> {
    output
        .trim()
        .lines()
        .skip(CLI_HEADER_LINES)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            if fields.len() < ASSIGNMENT_ROW_MIN_FIELDS {
                tracing::debug!(fields = fields.len(), line, "skipping short assignment row");
                return None;
            }

            Some(AssignmentRow {
                id: fields[0].to_string(),
                title: fields[1].to_string(),
                template_repo: fields[6].to_string(),
            })
        })
        .collect()
}

/// Parses a grades export. An empty export yields no rows; a present export must carry the
/// required columns and a username on every row.
pub fn parse_grades_csv(content: &str) -> MapResult<Vec<GradeRow>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    if let Some(missing) = REQUIRED_GRADE_COLUMNS
        .iter()
        .find(|col| !headers.iter().any(|h| h == **col))
    {
        return Err(MapErr::MissingColumn(*missing));
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.deserialize::<GradeRow>().enumerate() {
        let row = record?;
        if row.github_username.trim().is_empty() {
            return Err(MapErr::EmptyUsername { row: idx + 1 });
        }

        rows.push(row);
    }

    Ok(rows)
}

/// Canonical assignment name: lowercase ASCII letters, digits and single hyphens. Applying it
/// to its own output is a no-op.
pub fn format_assignment_name(title: &str) -> String {
    let mut formatted = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !formatted.is_empty() {
                formatted.push('-');
            }
            pending_hyphen = false;
            formatted.push(c);
        } else if c.is_whitespace() || c == '-' {
            pending_hyphen = true;
        }
    }

    formatted
}

/// How `points_available` was chosen when the source did not report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointsFallback {
    /// Highest `points_awarded` among the assignment's grades.
    MaxAwarded(i32),
    /// Fixed default for `part-2` assignments.
    PartTwoDefault,
    /// Nothing usable anywhere; stored as null.
    Unresolved,
}

/// Resolves an assignment's `points_available` from the highest value the source reported,
/// falling back to the highest awarded score and then to the `part-2` default.
///
/// The `part-2` default is a naming heuristic and only ever applies to names containing that
/// exact pattern.
pub fn resolve_points_available(
    source_max: Option<i32>,
    max_awarded: Option<i32>,
    name: &str,
) -> (Option<i32>, Option<PointsFallback>) {
    if let Some(points) = source_max.filter(|p| *p > 0) {
        return (Some(points), None);
    }

    if let Some(points) = max_awarded.filter(|p| *p > 0) {
        return (Some(points), Some(PointsFallback::MaxAwarded(points)));
    }

    if name.contains(PART_TWO_PATTERN) {
        return (
            Some(PART_TWO_DEFAULT_POINTS),
            Some(PointsFallback::PartTwoDefault),
        );
    }

    (None, Some(PointsFallback::Unresolved))
}

/// Builds the assignment record from its grades export.
pub fn assignment_from_grades(name: &str, rows: &[GradeRow]) -> (Assignment, Option<PointsFallback>) {
    let source_max = rows.iter().filter_map(|r| r.points_available.map(points)).max();
    let max_awarded = rows.iter().filter_map(GradeRow::points_awarded).max();
    let (points_available, fallback) = resolve_points_available(source_max, max_awarded, name);

    (
        Assignment {
            name: name.to_string(),
            points_available,
        },
        fallback,
    )
}

/// Whole hours between fork creation and last update, truncated toward zero.
pub fn resolution_hours(
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
) -> Option<i32> {
    let (created, updated) = (created_at?, updated_at?);
    i32::try_from((updated - created).num_hours()).ok()
}

/// Student-level fork data as reported by one assignment repository. Anything other than a
/// fork yields a student without fork data.
pub fn student_from_repo(username: &str, info: Option<&RepoInfo>) -> Student {
    match info {
        Some(info) if info.fork => Student {
            github_username: username.to_string(),
            fork_created_at: info.created_at,
            last_updated_at: info.updated_at,
            resolution_time_hours: resolution_hours(info.created_at, info.updated_at),
            has_fork: true,
        },
        _ => Student::without_fork(username),
    }
}

/// Grade for one export row; fork timestamps are only carried over from fork repositories.
pub fn grade_from_row(row: &GradeRow, assignment_name: &str, info: Option<&RepoInfo>) -> Grade {
    let fork = info.filter(|info| info.fork);

    Grade {
        github_username: row.github_username.trim().to_string(),
        assignment_name: assignment_name.to_string(),
        points_awarded: row.points_awarded(),
        fork_created_at: fork.and_then(|info| info.created_at),
        fork_updated_at: fork.and_then(|info| info.updated_at),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub total: i32,
    pub successful: i32,
    pub failed: i32,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
}

/// Summarizes one page of workflow runs. The total is the larger of the reported
/// `total_count` and the runs actually seen; runs that are neither `success` nor `failure`
/// only count toward the total.
pub fn aggregate_runs(runs: &WorkflowRuns) -> RunStats {
    let seen = runs.runs.len() as u64;
    let count = |conclusion: &str| {
        runs.runs
            .iter()
            .filter(|r| r.conclusion.as_deref() == Some(conclusion))
            .count() as i32
    };

    let timestamps = runs.runs.iter().filter_map(|r| r.created_at);

    RunStats {
        total: i32::try_from(runs.total_count.max(seen)).unwrap_or(i32::MAX),
        successful: count("success"),
        failed: count("failure"),
        first_at: timestamps.clone().min(),
        last_at: timestamps.max(),
    }
}

/// An attempt record waiting for its student and assignment surrogate ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttempt {
    pub github_username: String,
    pub assignment_name: String,
    pub repo_url: String,
    pub stats: RunStats,
    pub fork_created_at: Option<DateTime<Utc>>,
    pub fork_updated_at: Option<DateTime<Utc>>,
    pub commit_count: Option<i32>,
}

impl PendingAttempt {
    pub fn resolve(&self, user_id: StudentId, assignment_id: AssignmentId) -> AssignmentAttempt {
        AssignmentAttempt {
            user_id,
            assignment_id,
            repo_url: self.repo_url.clone(),
            total_attempts: self.stats.total,
            successful_attempts: self.stats.successful,
            failed_attempts: self.stats.failed,
            first_attempt_at: self.stats.first_at,
            last_attempt_at: self.stats.last_at,
            fork_created_at: self.fork_created_at,
            fork_updated_at: self.fork_updated_at,
            commit_count: self.commit_count,
        }
    }
}

pub type MapResult<T> = core::result::Result<T, MapErr>;

#[derive(Debug, Error)]
pub enum MapErr {
    #[error("classroom listing has {lines} lines, expected headers and at least one row")]
    ShortClassroomList { lines: usize },

    #[error("grades export is missing the '{0}' column")]
    MissingColumn(&'static str),

    #[error("grades export row {row} has an empty github_username")]
    EmptyUsername { row: usize },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;
    use crate::github::WorkflowRun;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_format_assignment_name() {
        assert_eq!(
            format_assignment_name("The Moria Mining Codex - Part 1"),
            "the-moria-mining-codex-part-1"
        );
        assert_eq!(format_assignment_name("  Hello,   World!! "), "hello-world");
        assert_eq!(format_assignment_name("--Rust_Basics--"), "rustbasics");
        assert_eq!(format_assignment_name("Día 2: Señales"), "da-2-seales");
        assert_eq!(format_assignment_name("!!!"), "");

        for title in ["The Moria Mining Codex - Part 1", "a  -  b", "Part-2 / Final"] {
            let once = format_assignment_name(title);
            assert_eq!(format_assignment_name(&once), once);
        }
    }

    #[test]
    fn test_parse_classroom_list() {
        let output = "Classrooms\n\nID\tName\tURL\n\
                      101\tB4OS-Dev-2025\thttps://classroom.github.com/c/101\n\
                      \n\
                      202 B4OS-Dev-2024 https://classroom.github.com/c/202\n";

        let rows = parse_classroom_list(output).unwrap();
        assert_eq!(
            rows,
            vec![
                ClassroomRow {
                    id: "101".to_string(),
                    name: "B4OS-Dev-2025".to_string()
                },
                ClassroomRow {
                    id: "202".to_string(),
                    name: "B4OS-Dev-2024".to_string()
                },
            ]
        );

        assert!(matches!(
            parse_classroom_list("a\nb\nc\n"),
            Err(MapErr::ShortClassroomList { lines: 3 })
        ));
    }

    #[test]
    fn test_parse_assignment_list() {
        let output = "Assignments for B4OS-Dev-2025\n\nID\tTitle\tSubmission\tType\tDeadline\tEditor\tRepo\n\
                      9001\tThe Moria Mining Codex - Part 1\tindividual\tgroup\t\tnone\tB4OS-Dev/moria-template\n\
                      9002\tshort\trow\n";

        let rows = parse_assignment_list(output);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "9001");
        assert_eq!(rows[0].title, "The Moria Mining Codex - Part 1");
        assert_eq!(rows[0].template_repo, "B4OS-Dev/moria-template");
    }

    #[test]
    fn test_parse_grades_csv() {
        let csv = "assignment_name,github_username,student_repository_url,points_awarded,points_available\n\
                   a1,alice,https://github.com/B4OS-Dev/a1-alice,80,100\n\
                   a1, bob ,,,100\n";

        let rows = parse_grades_csv(csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].points_awarded(), Some(80));
        assert_eq!(rows[0].repo_url(), Some("https://github.com/B4OS-Dev/a1-alice"));
        assert_eq!(rows[1].github_username, "bob");
        assert_eq!(rows[1].points_awarded(), None);
        assert_eq!(rows[1].repo_url(), None);

        assert!(parse_grades_csv("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_grades_csv_rejects_bad_exports() {
        assert!(matches!(
            parse_grades_csv("github_username,points_awarded\nalice,1\n"),
            Err(MapErr::MissingColumn("points_available"))
        ));
        assert!(matches!(
            parse_grades_csv("github_username,points_awarded,points_available\nalice,1,2\n,3,4\n"),
            Err(MapErr::EmptyUsername { row: 2 })
        ));
    }

    #[test]
    fn test_resolve_points_available() {
        assert_eq!(resolve_points_available(Some(100), Some(90), "a1"), (Some(100), None));
        assert_eq!(
            resolve_points_available(Some(0), Some(90), "a1"),
            (Some(90), Some(PointsFallback::MaxAwarded(90)))
        );
        assert_eq!(
            resolve_points_available(None, Some(0), "the-moria-mining-codex-part-2"),
            (Some(100), Some(PointsFallback::PartTwoDefault))
        );
        assert_eq!(
            resolve_points_available(Some(0), None, "the-moria-mining-codex-part-3"),
            (None, Some(PointsFallback::Unresolved))
        );
        assert_eq!(
            resolve_points_available(None, None, "part-20-bonus").0,
            Some(100),
            "the pattern is a plain substring match"
        );
    }

    #[test]
    fn test_resolution_hours() {
        assert_eq!(resolution_hours(Some(ts(1, 0)), Some(ts(2, 0))), Some(24));
        assert_eq!(
            resolution_hours(
                Some(ts(1, 0)),
                Some(ts(1, 5) + chrono::Duration::minutes(59))
            ),
            Some(5)
        );
        assert_eq!(resolution_hours(None, Some(ts(1, 0))), None);
    }

    #[test]
    fn test_aggregate_runs() {
        assert_eq!(aggregate_runs(&WorkflowRuns::default()), RunStats::default());

        let runs = WorkflowRuns {
            total_count: 2,
            runs: vec![
                WorkflowRun {
                    created_at: Some(ts(3, 0)),
                    conclusion: Some("success".to_string()),
                },
                WorkflowRun {
                    created_at: Some(ts(1, 0)),
                    conclusion: Some("failure".to_string()),
                },
                WorkflowRun {
                    created_at: Some(ts(2, 0)),
                    conclusion: Some("cancelled".to_string()),
                },
                WorkflowRun {
                    created_at: None,
                    conclusion: None,
                },
            ],
        };

        let stats = aggregate_runs(&runs);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert!(stats.successful + stats.failed <= stats.total);
        assert_eq!(stats.first_at, Some(ts(1, 0)));
        assert_eq!(stats.last_at, Some(ts(3, 0)));
    }

    #[test]
    fn test_fork_data_only_from_forks() {
        let info = RepoInfo {
            created_at: Some(ts(1, 0)),
            updated_at: Some(ts(2, 0)),
            fork: false,
        };
        let row = GradeRow {
            github_username: "alice".to_string(),
            student_repository_url: None,
            points_awarded: Some(80.0),
            points_available: Some(100.0),
        };

        assert_eq!(student_from_repo("alice", Some(&info)), Student::without_fork("alice"));
        assert!(grade_from_row(&row, "a1", Some(&info)).fork_created_at.is_none());

        let fork = RepoInfo { fork: true, ..info };
        let student = student_from_repo("alice", Some(&fork));
        assert!(student.has_fork);
        assert_eq!(student.resolution_time_hours, Some(24));
        assert_eq!(
            grade_from_row(&row, "a1", Some(&fork)).fork_updated_at,
            Some(ts(2, 0))
        );
    }
}

//! Remote data sources: the `gh classroom` CLI extension and the GitHub REST API.

use core::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::header::InvalidHeaderValue;
use serde::Deserialize;
use thiserror::Error;

use crate::constants::GITHUB_WEB_URL;

pub mod api;
pub mod classroom;
pub mod fetcher;

/// Raw output of the classroom CLI; parsing lives in [`crate::sync::mapper`].
#[async_trait]
pub trait ClassroomSource: Send + Sync {
    /// Tab-separated classroom listing, header lines included.
    async fn list_classrooms(&self) -> GithubResult<String>;

    /// Tab-separated assignment listing for one classroom, header lines included.
    async fn list_assignments(&self, classroom_id: &str) -> GithubResult<String>;

    /// CSV grades export for one assignment.
    async fn assignment_grades(&self, assignment_id: &str) -> GithubResult<String>;
}

#[async_trait]
pub trait RepoSource: Send + Sync {
    /// Fails with [`GithubErr::Unauthorized`] when the credentials are rejected.
    async fn verify_credentials(&self) -> GithubResult<()>;

    async fn repo_info(&self, repo: &RepoRef) -> GithubResult<RepoInfo>;

    /// The most recent page (at most 100) of Actions workflow runs.
    async fn workflow_runs(&self, repo: &RepoRef) -> GithubResult<WorkflowRuns>;

    async fn commit_count(&self, repo: &RepoRef) -> GithubResult<u64>;
}

/// `owner/name` of a student repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parses `https://github.com/<owner>/<repo>`, tolerating a trailing `/` or `.git`.
    pub fn parse(url: &str) -> GithubResult<Self> {
        let invalid = || GithubErr::InvalidUrl(url.to_string());

        let path = url.trim().strip_prefix(GITHUB_WEB_URL).ok_or_else(invalid)?;
        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);

        let mut parts = path.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoInfo {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fork: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WorkflowRuns {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default, rename = "workflow_runs")]
    pub runs: Vec<WorkflowRun>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowRun {
    pub created_at: Option<DateTime<Utc>>,
    pub conclusion: Option<String>,
}

pub type GithubResult<T> = core::result::Result<T, GithubErr>;

#[derive(Debug, Error)]
pub enum GithubErr {
    #[error("github rejected the token (401 Unauthorized)")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited on {uri} after {attempts} attempts")]
    RateLimited { uri: String, attempts: u32 },

    #[error("unexpected {status} response from {uri}")]
    Status { status: u16, uri: String },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("invalid repository url '{0}'")]
    InvalidUrl(String),

    #[error("`gh {command}` exited unsuccessfully: {stderr}")]
    Cli { command: String, stderr: String },

    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("while creating a HeaderValue ({0})")]
    HeaderError(#[from] InvalidHeaderValue),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GithubErr {
    /// Credential failures abort the whole run; everything else is scoped to one request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GithubErr::Unauthorized)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_repo_url() {
        let expected = RepoRef {
            owner: "B4OS-Dev".to_string(),
            name: "a1-alice".to_string(),
        };

        for url in [
            "https://github.com/B4OS-Dev/a1-alice",
            "https://github.com/B4OS-Dev/a1-alice/",
            "https://github.com/B4OS-Dev/a1-alice.git",
            " https://github.com/B4OS-Dev/a1-alice.git/ ",
        ] {
            assert_eq!(RepoRef::parse(url).unwrap(), expected, "{url}");
        }

        assert_eq!(expected.to_string(), "B4OS-Dev/a1-alice");
    }

    #[test]
    fn test_parse_repo_url_rejects_other_shapes() {
        for url in [
            "",
            "https://gitlab.com/B4OS-Dev/a1-alice",
            "https://github.com/B4OS-Dev",
            "https://github.com/B4OS-Dev/a1-alice/tree/main",
            "https://github.com//a1-alice",
        ] {
            assert!(
                matches!(RepoRef::parse(url), Err(GithubErr::InvalidUrl(_))),
                "{url}"
            );
        }
    }

    #[test]
    fn test_runs_payload() {
        let runs: WorkflowRuns = serde_json::from_str(
            r#"{
                "total_count": 2,
                "workflow_runs": [
                    {"id": 1, "created_at": "2025-01-01T10:00:00Z", "conclusion": "success"},
                    {"id": 2, "created_at": "2025-01-01T09:00:00Z", "conclusion": null}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(runs.total_count, 2);
        assert_eq!(runs.runs[0].conclusion.as_deref(), Some("success"));
        assert!(runs.runs[1].conclusion.is_none());
    }
}

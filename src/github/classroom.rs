use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::instrument;
use uuid::Uuid;

use super::{ClassroomSource, GithubErr, GithubResult};
use crate::constants::GH_BINARY;

/// `gh classroom` invocations. The CLI authenticates with its own stored login, so
/// `GITHUB_TOKEN` is stripped from the child environment.
#[derive(Debug, Clone)]
pub struct GhCli {
    binary: String,
    timeout: Duration,
}

impl GhCli {
    pub fn new(timeout: Duration) -> Self {
        Self::with_binary(GH_BINARY, timeout)
    }

    pub fn with_binary(binary: &str, timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            timeout,
        }
    }

    #[instrument(skip(self))]
    async fn run(&self, args: &[&str]) -> GithubResult<String> {
        let command = args.join(" ");

        let child = Command::new(&self.binary)
            .args(args)
            .env_remove("GITHUB_TOKEN")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| GithubErr::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!(command, code = ?output.status.code(), stderr, "gh command failed");
            return Err(GithubErr::Cli { command, stderr });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        tracing::debug!(command, bytes = stdout.len(), "gh command complete");
        Ok(stdout)
    }
}

fn grades_path() -> PathBuf {
    std::env::temp_dir().join(format!("classroom-grades-{}.csv", Uuid::new_v4()))
}

#[async_trait]
impl ClassroomSource for GhCli {
    async fn list_classrooms(&self) -> GithubResult<String> {
        self.run(&["classroom", "list"]).await
    }

    async fn list_assignments(&self, classroom_id: &str) -> GithubResult<String> {
        self.run(&["classroom", "assignments", "-c", classroom_id])
            .await
    }

    /// The export is written to a scratch file that is removed once read, whether or not the
    /// command succeeded.
    #[instrument(skip(self))]
    async fn assignment_grades(&self, assignment_id: &str) -> GithubResult<String> {
        let path = grades_path();
        let path_str = path.to_string_lossy().into_owned();

        let result = match self
            .run(&[
                "classroom",
                "assignment-grades",
                "-a",
                assignment_id,
                "-f",
                &path_str,
            ])
            .await
        {
            Ok(_) => tokio::fs::read_to_string(&path).await.map_err(GithubErr::from),
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_file(&path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %path.display(), error = ?e, "unable to remove grades export");
        }

        result
    }
}

#[cfg(all(test, unix))]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let cli = GhCli::with_binary("echo", Duration::from_secs(5));
        let out = cli.list_classrooms().await.unwrap();
        assert_eq!(out.trim(), "classroom list");
    }

    #[tokio::test]
    async fn test_run_reports_failure() {
        let cli = GhCli::with_binary("false", Duration::from_secs(5));
        let err = cli.list_assignments("42").await.unwrap_err();
        assert!(
            matches!(err, GithubErr::Cli { ref command, .. } if command == "classroom assignments -c 42")
        );
    }

    #[tokio::test]
    async fn test_missing_export_file_is_an_error() {
        // `true` succeeds without writing the export
        let cli = GhCli::with_binary("true", Duration::from_secs(5));
        let err = cli.assignment_grades("42").await.unwrap_err();
        assert!(matches!(err, GithubErr::Io(_)));
    }
}

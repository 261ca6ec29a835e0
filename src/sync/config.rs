use std::time::Duration;

use thiserror::Error;

use crate::util::env::Env;

/// Overrides taken from the command line; `None` falls back to the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub classroom: Option<String>,
    pub assignment_id: Option<String>,
    pub track: Option<String>,
    pub log_level: Option<String>,
    pub dry_run: bool,
}

/// Validated settings for one sync run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub classroom_name: String,
    pub database_url: Option<String>,
    pub github_token: String,
    /// Restricts the run to one classroom assignment id.
    pub assignment_id: Option<String>,
    /// Username whose records get distinguished log entries.
    pub tracked_username: Option<String>,
    pub log_level: String,
    pub max_retries: u32,
    pub timeout: Duration,
    pub dry_run: bool,
    pub otel_endpoint: Option<String>,
}

impl SyncConfig {
    pub fn from_env(env: Env, overrides: Overrides) -> ConfigResult<Self> {
        let classroom_name = non_empty(overrides.classroom)
            .or(non_empty(env.classroom_name))
            .ok_or(ConfigErr::Missing("CLASSROOM_NAME"))?;

        let github_token =
            non_empty(env.github_token).ok_or(ConfigErr::Missing("GITHUB_TOKEN"))?;

        let database_url = non_empty(env.database_url);
        if database_url.is_none() && !overrides.dry_run {
            return Err(ConfigErr::Missing("DATABASE_URL"));
        }

        if env.timeout_seconds == 0 {
            return Err(ConfigErr::Invalid {
                name: "TIMEOUT_SECONDS",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            classroom_name,
            database_url,
            github_token,
            assignment_id: non_empty(overrides.assignment_id).or(non_empty(env.assignment_id)),
            tracked_username: non_empty(overrides.track).or(non_empty(env.search_username)),
            log_level: non_empty(overrides.log_level).unwrap_or(env.log_level),
            max_retries: env.max_retries,
            timeout: Duration::from_secs(env.timeout_seconds),
            dry_run: overrides.dry_run,
            otel_endpoint: non_empty(env.otel_exporter_otlp_endpoint),
        })
    }

    pub fn is_tracked(&self, username: &str) -> bool {
        self.tracked_username
            .as_deref()
            .is_some_and(|tracked| tracked.eq_ignore_ascii_case(username))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub type ConfigResult<T> = core::result::Result<T, ConfigErr>;

#[derive(Debug, Error)]
pub enum ConfigErr {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::env::from_iter;

    fn env(pairs: &[(&str, &str)]) -> Env {
        from_iter(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>(),
        )
        .unwrap()
    }

    #[test]
    fn test_overrides_win() {
        let env = env(&[
            ("CLASSROOM_NAME", "B4OS-Dev-2025"),
            ("GITHUB_TOKEN", "ghp_test"),
            ("DATABASE_URL", "postgres://localhost/classroom"),
            ("SEARCH_USERNAME", "alice"),
        ]);

        let config = SyncConfig::from_env(
            env,
            Overrides {
                classroom: Some("B4OS-Dev-2026".to_string()),
                track: Some("bob".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(config.classroom_name, "B4OS-Dev-2026");
        assert!(config.is_tracked("BOB"));
        assert!(!config.is_tracked("alice"));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_database_url_optional_on_dry_run() {
        let pairs = [("CLASSROOM_NAME", "B4OS-Dev-2025"), ("GITHUB_TOKEN", "ghp_test")];

        let err = SyncConfig::from_env(env(&pairs), Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigErr::Missing("DATABASE_URL")));

        let config = SyncConfig::from_env(
            env(&pairs),
            Overrides {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_missing_required() {
        let err = SyncConfig::from_env(env(&[("GITHUB_TOKEN", "x")]), Overrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigErr::Missing("CLASSROOM_NAME")));

        let err = SyncConfig::from_env(
            env(&[("CLASSROOM_NAME", "B4OS-Dev-2025"), ("GITHUB_TOKEN", "  ")]),
            Overrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigErr::Missing("GITHUB_TOKEN")));
    }
}

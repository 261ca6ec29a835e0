use std::time::Duration;

use async_trait::async_trait;
use http::header::{ACCEPT, AUTHORIZATION, LINK, RETRY_AFTER};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::instrument;

use super::{GithubErr, GithubResult, RepoInfo, RepoRef, RepoSource, WorkflowRuns};
use crate::constants::{
    COMMIT_PAGE_LIMIT, COMMITS_PER_PAGE, GITHUB_API_URL, GITHUB_API_VERSION, RETRY_BASE_DELAY_MS,
    RETRY_MAX_DELAY_MS, USER_AGENT, WORKFLOW_RUNS_PER_PAGE,
};

/// GitHub REST client with bearer auth and retry/backoff on throttling and server errors.
#[derive(Debug, Clone)]
pub struct GithubApi {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl GithubApi {
    pub fn new(token: &str, timeout: Duration, max_retries: u32) -> GithubResult<Self> {
        Self::with_base_url(GITHUB_API_URL, token, timeout, max_retries)
    }

    pub fn with_base_url(
        base_url: &str,
        token: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> GithubResult<Self> {
        let client = reqwest::Client::builder()
            .default_headers(auth_headers(token)?)
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries,
        })
    }

    #[instrument(skip(self))]
    async fn send(&self, uri: &str) -> GithubResult<reqwest::Response> {
        let mut attempt = 0;

        loop {
            let res = self.client.get(uri).send().await?;
            log_rate_limit(res.headers());

            let status = res.status();
            if status.is_success() {
                return Ok(res);
            }

            match status {
                StatusCode::UNAUTHORIZED => return Err(GithubErr::Unauthorized),
                StatusCode::NOT_FOUND => return Err(GithubErr::NotFound(uri.to_string())),
                _ if is_retryable(status, res.headers()) => {
                    if attempt >= self.max_retries {
                        tracing::error!(code = %status, attempt, "retries exhausted");
                        return Err(if status.is_server_error() {
                            GithubErr::Status {
                                status: status.as_u16(),
                                uri: uri.to_string(),
                            }
                        } else {
                            GithubErr::RateLimited {
                                uri: uri.to_string(),
                                attempts: attempt + 1,
                            }
                        });
                    }

                    let delay = backoff_delay(attempt, retry_after(res.headers()));
                    tracing::warn!(
                        code = %status,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "retryable response, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => {
                    tracing::error!(code = %status, "non-success response");
                    if let Ok(reason) = res.json::<Value>().await {
                        tracing::debug!(body = ?reason, "error message in response");
                    }

                    return Err(GithubErr::Status {
                        status: status.as_u16(),
                        uri: uri.to_string(),
                    });
                }
            }
        }
    }

    async fn get_json<T>(&self, uri: &str) -> GithubResult<T>
    where
        T: DeserializeOwned,
    {
        Ok(self.send(uri).await?.json::<T>().await?)
    }

    /// Counts commits by paging through the full history. Used when the `Link` header does not
    /// carry a last page.
    #[instrument(skip(self), fields(repo = %repo))]
    async fn count_commits_paginated(&self, repo: &RepoRef) -> GithubResult<u64> {
        let mut total = 0;

        for page in 1..=COMMIT_PAGE_LIMIT {
            let uri = format!(
                "{}/repos/{}/{}/commits?per_page={}&page={}",
                self.base_url, repo.owner, repo.name, COMMITS_PER_PAGE, page
            );
            let commits: Vec<Value> = self.get_json(&uri).await?;
            total += commits.len() as u64;

            if commits.len() < COMMITS_PER_PAGE {
                return Ok(total);
            }
        }

        tracing::warn!(total, "commit page limit reached, count is a lower bound");
        Ok(total)
    }
}

#[async_trait]
impl RepoSource for GithubApi {
    /// `/rate_limit` does not count against the quota.
    #[instrument(skip(self))]
    async fn verify_credentials(&self) -> GithubResult<()> {
        let body: Value = self.get_json(&format!("{}/rate_limit", self.base_url)).await?;
        tracing::debug!(
            remaining = ?body["resources"]["core"]["remaining"],
            limit = ?body["resources"]["core"]["limit"],
            "github credentials accepted"
        );
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn repo_info(&self, repo: &RepoRef) -> GithubResult<RepoInfo> {
        self.get_json(&format!(
            "{}/repos/{}/{}",
            self.base_url, repo.owner, repo.name
        ))
        .await
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn workflow_runs(&self, repo: &RepoRef) -> GithubResult<WorkflowRuns> {
        let runs: WorkflowRuns = self
            .get_json(&format!(
                "{}/repos/{}/{}/actions/runs?per_page={}",
                self.base_url, repo.owner, repo.name, WORKFLOW_RUNS_PER_PAGE
            ))
            .await?;

        tracing::debug!(
            total_count = runs.total_count,
            fetched = runs.runs.len(),
            "fetched workflow runs"
        );
        Ok(runs)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn commit_count(&self, repo: &RepoRef) -> GithubResult<u64> {
        let uri = format!(
            "{}/repos/{}/{}/commits?per_page=1",
            self.base_url, repo.owner, repo.name
        );
        let res = self.send(&uri).await?;

        let last_page = res
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(last_page_from_link);

        match last_page {
            Some(count) => Ok(count),
            None => self.count_commits_paginated(repo).await,
        }
    }
}

fn auth_headers(token: &str) -> GithubResult<HeaderMap> {
    let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))?;
    bearer.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
    headers.insert(
        "x-github-api-version",
        HeaderValue::from_static(GITHUB_API_VERSION),
    );

    Ok(headers)
}

/// 429, 5xx, and 403s caused by an exhausted primary quota.
fn is_retryable(status: StatusCode, headers: &HeaderMap) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return true;
    }

    status == StatusCode::FORBIDDEN
        && headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == "0")
}

fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Delay before retry number `attempt + 1`: the server's `retry-after` when given, otherwise
/// exponential from the base delay. Both are capped.
pub fn backoff_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let max = Duration::from_millis(RETRY_MAX_DELAY_MS);

    match retry_after_secs {
        Some(secs) => Duration::from_secs(secs).min(max),
        None => {
            let factor = 2u64.saturating_pow(attempt);
            Duration::from_millis(RETRY_BASE_DELAY_MS.saturating_mul(factor)).min(max)
        }
    }
}

/// Extracts the `page` query parameter of the `rel="last"` entry of a `Link` header.
pub fn last_page_from_link(link: &str) -> Option<u64> {
    link.split(',')
        .find(|part| part.contains(r#"rel="last""#))
        .and_then(|part| {
            let start = part.find('<')? + 1;
            let end = part.find('>')?;
            part.get(start..end)
        })
        .and_then(|url| url.split_once('?').map(|(_, query)| query))
        .and_then(|query| {
            query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "page")
                .and_then(|(_, value)| value.parse().ok())
        })
}

fn log_rate_limit(headers: &HeaderMap) {
    let remaining = headers.get("x-ratelimit-remaining");
    let total = headers.get("x-ratelimit-limit");

    if let Some(remaining) = remaining
        && let Some(total) = total
    {
        tracing::debug!(ratelimit_available = ?remaining, ratelimit_total = ?total, "rate-limit bucket");
    }
}

#[cfg(test)]
mod test {
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn repo() -> RepoRef {
        RepoRef {
            owner: "B4OS-Dev".to_string(),
            name: "a1-alice".to_string(),
        }
    }

    fn client(server: &MockServer, max_retries: u32) -> GithubApi {
        GithubApi::with_base_url(&server.uri(), "ghp_test", Duration::from_secs(5), max_retries)
            .unwrap()
    }

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(0, None), Duration::from_millis(500));
        assert_eq!(backoff_delay(1, None), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3, None), Duration::from_millis(4000));
        assert_eq!(backoff_delay(20, None), Duration::from_secs(30));
        assert_eq!(backoff_delay(0, Some(7)), Duration::from_secs(7));
        assert_eq!(backoff_delay(0, Some(600)), Duration::from_secs(30));
    }

    #[test]
    fn test_last_page_from_link() {
        let link = r#"<https://api.github.com/repositories/1/commits?per_page=1&page=2>; rel="next", <https://api.github.com/repositories/1/commits?per_page=1&page=42>; rel="last""#;
        assert_eq!(last_page_from_link(link), Some(42));

        let no_last = r#"<https://api.github.com/repositories/1/commits?per_page=1&page=2>; rel="next""#;
        assert_eq!(last_page_from_link(no_last), None);
        assert_eq!(last_page_from_link(""), None);
    }

    #[tokio::test]
    async fn test_repo_info_sends_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/B4OS-Dev/a1-alice"))
            .and(header("authorization", "Bearer ghp_test"))
            .and(header("accept", "application/vnd.github+json"))
            .and(header("x-github-api-version", GITHUB_API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "full_name": "B4OS-Dev/a1-alice",
                "created_at": "2025-01-01T00:00:00Z",
                "updated_at": "2025-01-02T00:00:00Z",
                "fork": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let info = client(&server, 0).repo_info(&repo()).await.unwrap();
        assert!(info.fork);
        assert_eq!(
            info.created_at.unwrap().to_rfc3339(),
            "2025-01-01T00:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_workflow_runs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/B4OS-Dev/a1-alice/actions/runs"))
            .and(query_param("per_page", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total_count": 130,
                "workflow_runs": [
                    {"created_at": "2025-01-01T12:00:00Z", "conclusion": "failure"},
                    {"created_at": "2025-01-01T13:00:00Z", "conclusion": "success"}
                ]
            })))
            .mount(&server)
            .await;

        let runs = client(&server, 0).workflow_runs(&repo()).await.unwrap();
        assert_eq!(runs.total_count, 130);
        assert_eq!(runs.runs.len(), 2);
    }

    #[tokio::test]
    async fn test_commit_count_from_link_header() {
        let server = MockServer::start().await;
        let link = format!(
            r#"<{}/repos/B4OS-Dev/a1-alice/commits?per_page=1&page=2>; rel="next", <{}/repos/B4OS-Dev/a1-alice/commits?per_page=1&page=17>; rel="last""#,
            server.uri(),
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/repos/B4OS-Dev/a1-alice/commits"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", link.as_str())
                    .set_body_json(serde_json::json!([{"sha": "abc"}])),
            )
            .mount(&server)
            .await;

        assert_eq!(client(&server, 0).commit_count(&repo()).await.unwrap(), 17);
    }

    #[tokio::test]
    async fn test_commit_count_without_link_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/B4OS-Dev/a1-alice/commits"))
            .and(query_param("per_page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"sha": "a"}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/B4OS-Dev/a1-alice/commits"))
            .and(query_param("per_page", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"sha": "a"}, {"sha": "b"}, {"sha": "c"}
            ])))
            .mount(&server)
            .await;

        assert_eq!(client(&server, 0).commit_count(&repo()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/B4OS-Dev/a1-alice"))
            .respond_with(ResponseTemplate::new(502).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/B4OS-Dev/a1-alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "created_at": null,
                "updated_at": null,
                "fork": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let info = client(&server, 2).repo_info(&repo()).await.unwrap();
        assert!(!info.fork);
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/B4OS-Dev/a1-alice"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("retry-after", "0"),
            )
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server, 1).repo_info(&repo()).await.unwrap_err();
        assert!(matches!(err, GithubErr::RateLimited { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rate_limit"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, 3).verify_credentials().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/B4OS-Dev/a1-alice"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, 3).repo_info(&repo()).await.unwrap_err();
        assert!(matches!(err, GithubErr::NotFound(_)));
        assert!(!err.is_fatal());
    }
}

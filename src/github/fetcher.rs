use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use leaky_bucket::RateLimiter;
use tracing::instrument;

use super::{GithubErr, GithubResult, RepoInfo, RepoRef, RepoSource, WorkflowRuns};
use crate::constants::{ENRICH_BATCH_SIZE, REQUEST_INTERVAL_MS};

/// Issues per-repository requests in bounded batches.
///
/// Requests inside a batch run concurrently but are spaced out by a shared limiter; the next
/// batch starts only after every request of the current one has finished or timed out. Results
/// always come back in input order.
pub struct RepoFetcher<'a> {
    source: &'a dyn RepoSource,
    limiter: RateLimiter,
    timeout: Duration,
    batch_size: usize,
}

impl<'a> RepoFetcher<'a> {
    pub fn new(source: &'a dyn RepoSource, timeout: Duration) -> Self {
        Self {
            source,
            limiter: RateLimiter::builder()
                .initial(1)
                .refill(1)
                .max(1)
                .interval(Duration::from_millis(REQUEST_INTERVAL_MS))
                .build(),
            timeout,
            batch_size: ENRICH_BATCH_SIZE,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn repo_infos(&self, repos: &[RepoRef]) -> Vec<GithubResult<RepoInfo>> {
        self.batched("repo_info", repos, |repo| self.source.repo_info(repo))
            .await
    }

    pub async fn workflow_runs(&self, repos: &[RepoRef]) -> Vec<GithubResult<WorkflowRuns>> {
        self.batched("workflow_runs", repos, |repo| {
            self.source.workflow_runs(repo)
        })
        .await
    }

    pub async fn commit_counts(&self, repos: &[RepoRef]) -> Vec<GithubResult<u64>> {
        self.batched("commit_count", repos, |repo| self.source.commit_count(repo))
            .await
    }

    #[instrument(skip(self, repos, f), fields(repos = repos.len(), batch_size = self.batch_size))]
    async fn batched<'s, T, F, Fut>(
        &'s self,
        op: &'static str,
        repos: &'s [RepoRef],
        f: F,
    ) -> Vec<GithubResult<T>>
    where
        F: Fn(&'s RepoRef) -> Fut,
        Fut: Future<Output = GithubResult<T>>,
    {
        let mut results = Vec::with_capacity(repos.len());

        for (batch, chunk) in repos.chunks(self.batch_size).enumerate() {
            let requests = chunk.iter().map(|repo| {
                let request = f(repo);
                async move {
                    self.limiter.acquire_one().await;
                    match tokio::time::timeout(self.timeout, request).await {
                        Ok(res) => res,
                        Err(_) => {
                            tracing::warn!(repo = %repo, timeout = ?self.timeout, "request timed out");
                            Err(GithubErr::Timeout(self.timeout))
                        }
                    }
                }
            });

            let batch_results = join_all(requests).await;
            let failed = batch_results.iter().filter(|r| r.is_err()).count();
            tracing::debug!(batch, size = chunk.len(), failed, "batch complete");

            results.extend(batch_results);
        }

        results
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct SlowSource {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        hang: HashSet<String>,
        seen: Mutex<Vec<String>>,
    }

    impl SlowSource {
        async fn work(&self, repo: &RepoRef) {
            self.seen.lock().unwrap().push(repo.name.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if self.hang.contains(&repo.name) {
                std::future::pending::<()>().await;
            }

            tokio::time::sleep(Duration::from_secs(1)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RepoSource for SlowSource {
        async fn verify_credentials(&self) -> GithubResult<()> {
            Ok(())
        }

        async fn repo_info(&self, repo: &RepoRef) -> GithubResult<RepoInfo> {
            self.work(repo).await;
            Ok(RepoInfo {
                created_at: None,
                updated_at: None,
                fork: repo.name.ends_with('0'),
            })
        }

        async fn workflow_runs(&self, repo: &RepoRef) -> GithubResult<WorkflowRuns> {
            self.work(repo).await;
            Ok(WorkflowRuns::default())
        }

        async fn commit_count(&self, repo: &RepoRef) -> GithubResult<u64> {
            self.work(repo).await;
            repo.name
                .trim_start_matches("repo-")
                .parse()
                .map_err(|_| GithubErr::InvalidUrl(repo.name.clone()))
        }
    }

    fn repos(n: usize) -> Vec<RepoRef> {
        (0..n)
            .map(|i| RepoRef {
                owner: "B4OS-Dev".to_string(),
                name: format!("repo-{i}"),
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_bounded_and_ordered() {
        let source = SlowSource::default();
        let fetcher = RepoFetcher::new(&source, Duration::from_secs(30));
        let repos = repos(25);

        let counts = fetcher.commit_counts(&repos).await;

        let max = source.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= fetcher.batch_size(), "max in flight {max}");
        assert!(max > 1, "requests in a batch should overlap");

        let counts: Vec<u64> = counts.into_iter().map(Result::unwrap).collect();
        assert_eq!(counts, (0..25).collect::<Vec<u64>>());

        // every request of batch n starts before any request of batch n + 1
        let seen = source.seen.lock().unwrap().clone();
        for (batch, chunk) in seen.chunks(fetcher.batch_size()).enumerate() {
            let expected: HashSet<String> = repos
                .iter()
                .skip(batch * fetcher.batch_size())
                .take(fetcher.batch_size())
                .map(|r| r.name.clone())
                .collect();
            assert_eq!(chunk.iter().cloned().collect::<HashSet<_>>(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_request_times_out() {
        let source = SlowSource {
            hang: HashSet::from(["repo-1".to_string()]),
            ..Default::default()
        };
        let fetcher = RepoFetcher::new(&source, Duration::from_secs(5));

        let infos = fetcher.repo_infos(&repos(3)).await;

        assert_eq!(infos.len(), 3);
        assert!(infos[0].as_ref().unwrap().fork);
        assert!(matches!(infos[1], Err(GithubErr::Timeout(_))));
        assert!(!infos[2].as_ref().unwrap().fork);
    }
}

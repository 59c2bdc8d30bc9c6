use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use prsync_core::{PrState, RepoFullName, ReviewOutcome};
use tokio::sync::RwLock;

use crate::client::{GitHubApi, GitHubApiError, PullRequestSnapshot};

type PrKey = (RepoFullName, u64);

#[derive(Clone, Debug)]
struct FakePullRequest {
    snapshot: PullRequestSnapshot,
    review: Option<ReviewOutcome>,
}

/// GitHub double. Unknown pull requests answer HTTP 404 like the real API.
#[derive(Default)]
pub struct InMemoryGitHubApi {
    pulls: RwLock<HashMap<PrKey, FakePullRequest>>,
    pull_failure: RwLock<Option<GitHubApiError>>,
    review_failure: RwLock<Option<GitHubApiError>>,
    calls: AtomicU64,
}

impl InMemoryGitHubApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_pull_request(&self, repo: &RepoFullName, snapshot: PullRequestSnapshot) {
        let mut pulls = self.pulls.write().await;
        let review = pulls.get(&(repo.clone(), snapshot.number)).and_then(|pull| pull.review);
        pulls.insert((repo.clone(), snapshot.number), FakePullRequest { snapshot, review });
    }

    /// Convenience for tests that only care about state.
    pub async fn set_state(&self, repo: &RepoFullName, number: u64, state: PrState) {
        let mut pulls = self.pulls.write().await;
        let entry = pulls.entry((repo.clone(), number)).or_insert_with(|| FakePullRequest {
            snapshot: PullRequestSnapshot {
                number,
                state,
                draft: false,
                title: format!("PR {number}"),
                html_url: format!("https://github.com/{repo}/pull/{number}"),
                author_login: "octocat".to_owned(),
            },
            review: None,
        });
        entry.snapshot.state = state;
    }

    pub async fn set_review(&self, repo: &RepoFullName, number: u64, review: Option<ReviewOutcome>) {
        if let Some(pull) = self.pulls.write().await.get_mut(&(repo.clone(), number)) {
            pull.review = review;
        }
    }

    pub async fn fail_pull_requests(&self, error: Option<GitHubApiError>) {
        *self.pull_failure.write().await = error;
    }

    pub async fn fail_reviews(&self, error: Option<GitHubApiError>) {
        *self.review_failure.write().await = error;
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn lookup(&self, repo: &RepoFullName, number: u64) -> Result<FakePullRequest, GitHubApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pulls.read().await.get(&(repo.clone(), number)).cloned().ok_or_else(|| {
            GitHubApiError::Http { endpoint: format!("/repos/{repo}/pulls/{number}"), status: 404 }
        })
    }
}

#[async_trait]
impl GitHubApi for InMemoryGitHubApi {
    async fn pull_request(
        &self,
        repo: &RepoFullName,
        number: u64,
    ) -> Result<PullRequestSnapshot, GitHubApiError> {
        if let Some(error) = self.pull_failure.read().await.clone() {
            return Err(error);
        }
        Ok(self.lookup(repo, number).await?.snapshot)
    }

    async fn latest_review_outcome(
        &self,
        repo: &RepoFullName,
        number: u64,
    ) -> Result<Option<ReviewOutcome>, GitHubApiError> {
        if let Some(error) = self.review_failure.read().await.clone() {
            return Err(error);
        }
        Ok(self.lookup(repo, number).await?.review)
    }
}

use std::time::Duration;

use async_trait::async_trait;
use prsync_core::{ApplicationError, ErrorKind, PrState, RepoFullName, ReviewOutcome};
use reqwest::{header, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const REQUEST_TIMEOUT_SECS: u64 = 10;
const API_VERSION: &str = "2022-11-28";
const REVIEWS_PER_PAGE: usize = 100;
const MAX_REVIEW_PAGES: u32 = 10;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GitHubApiError {
    #[error("github `{endpoint}` returned HTTP {status}")]
    Http { endpoint: String, status: u16 },
    #[error("github `{endpoint}` rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { endpoint: String, retry_after_secs: Option<u64> },
    #[error("github `{endpoint}` transport error: {message}")]
    Transport { endpoint: String, message: String },
    #[error("github `{endpoint}` response could not be decoded: {message}")]
    Decode { endpoint: String, message: String },
}

impl GitHubApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } | Self::Transport { .. } => ErrorKind::TransientDependency,
            Self::Http { status, .. } if *status >= 500 || *status == 408 => {
                ErrorKind::TransientDependency
            }
            Self::Http { .. } | Self::Decode { .. } => ErrorKind::PermanentDependency,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<GitHubApiError> for ApplicationError {
    fn from(error: GitHubApiError) -> Self {
        ApplicationError::from_kind(error.kind(), error.to_string())
    }
}

/// Live view of a pull request, fetched fresh whenever reactions are re-derived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullRequestSnapshot {
    pub number: u64,
    pub state: PrState,
    pub draft: bool,
    pub title: String,
    pub html_url: String,
    pub author_login: String,
}

#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn pull_request(
        &self,
        repo: &RepoFullName,
        number: u64,
    ) -> Result<PullRequestSnapshot, GitHubApiError>;

    /// Outcome of the most recent effective review, `None` when there is none
    /// or the latest one was dismissed.
    async fn latest_review_outcome(
        &self,
        repo: &RepoFullName,
        number: u64,
    ) -> Result<Option<ReviewOutcome>, GitHubApiError>;
}

/// Folds reviews in submission order. `DISMISSED` clears the outcome and
/// `PENDING` drafts are ignored.
pub fn fold_review_states<'a>(states: impl IntoIterator<Item = &'a str>) -> Option<ReviewOutcome> {
    states.into_iter().fold(None, |current, state| {
        if state.eq_ignore_ascii_case("dismissed") {
            None
        } else {
            ReviewOutcome::parse(state).or(current)
        }
    })
}

pub struct HttpGitHubClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

#[derive(Deserialize)]
struct RawPullRequest {
    number: u64,
    state: String,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    title: String,
    #[serde(default)]
    html_url: String,
    user: RawUser,
}

#[derive(Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Deserialize)]
struct RawReview {
    state: String,
}

impl HttpGitHubClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<SecretString>,
    ) -> Result<Self, GitHubApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("prsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| GitHubApiError::Transport {
                endpoint: "client.build".to_owned(),
                message: error.to_string(),
            })?;
        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_owned(), token })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: String,
        query: &[(&str, String)],
    ) -> Result<T, GitHubApiError> {
        debug!(event_name = "github.api.call", endpoint = %endpoint, "calling github");

        let mut request = self
            .http
            .get(format!("{}{endpoint}", self.base_url))
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|error| GitHubApiError::Transport {
            endpoint: endpoint.clone(),
            message: error.to_string(),
        })?;
        let status = response.status();
        let headers = response.headers();
        let exhausted = headers
            .get("x-ratelimit-remaining")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim() == "0")
            .unwrap_or(false);
        if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && exhausted)
        {
            let retry_after_secs = headers
                .get(header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok());
            return Err(GitHubApiError::RateLimited { endpoint, retry_after_secs });
        }
        if !status.is_success() {
            return Err(GitHubApiError::Http { endpoint, status: status.as_u16() });
        }

        response
            .json()
            .await
            .map_err(|error| GitHubApiError::Decode { endpoint, message: error.to_string() })
    }
}

#[async_trait]
impl GitHubApi for HttpGitHubClient {
    async fn pull_request(
        &self,
        repo: &RepoFullName,
        number: u64,
    ) -> Result<PullRequestSnapshot, GitHubApiError> {
        let raw: RawPullRequest =
            self.get_json(format!("/repos/{repo}/pulls/{number}"), &[]).await?;
        Ok(PullRequestSnapshot {
            number: raw.number,
            state: PrState::from_parts(&raw.state, raw.merged),
            draft: raw.draft,
            title: raw.title,
            html_url: raw.html_url,
            author_login: raw.user.login,
        })
    }

    async fn latest_review_outcome(
        &self,
        repo: &RepoFullName,
        number: u64,
    ) -> Result<Option<ReviewOutcome>, GitHubApiError> {
        let mut states = Vec::new();
        for page in 1..=MAX_REVIEW_PAGES {
            let reviews: Vec<RawReview> = self
                .get_json(
                    format!("/repos/{repo}/pulls/{number}/reviews"),
                    &[("per_page", REVIEWS_PER_PAGE.to_string()), ("page", page.to_string())],
                )
                .await?;
            let last_page = reviews.len() < REVIEWS_PER_PAGE;
            states.extend(reviews.into_iter().map(|review| review.state));
            if last_page {
                break;
            }
        }
        Ok(fold_review_states(states.iter().map(String::as_str)))
    }
}

#[cfg(test)]
mod tests {
    use prsync_core::{ApplicationError, ErrorKind, ReviewOutcome};

    use super::{fold_review_states, GitHubApiError};

    #[test]
    fn latest_effective_review_wins() {
        assert_eq!(
            fold_review_states(["APPROVED", "CHANGES_REQUESTED", "COMMENTED"]),
            Some(ReviewOutcome::Commented)
        );
        assert_eq!(fold_review_states(["CHANGES_REQUESTED", "PENDING"]), Some(ReviewOutcome::ChangesRequested));
        assert_eq!(fold_review_states(Vec::<&str>::new()), None);
    }

    #[test]
    fn dismissal_clears_until_next_review() {
        assert_eq!(fold_review_states(["APPROVED", "DISMISSED"]), None);
        assert_eq!(
            fold_review_states(["APPROVED", "DISMISSED", "APPROVED"]),
            Some(ReviewOutcome::Approved)
        );
    }

    #[test]
    fn classifies_http_failures() {
        let endpoint = || "/repos/acme/api/pulls/1".to_owned();
        for status in [500, 502, 503] {
            assert!(GitHubApiError::Http { endpoint: endpoint(), status }.is_retryable());
        }
        for status in [401, 403, 404, 422] {
            assert_eq!(
                GitHubApiError::Http { endpoint: endpoint(), status }.kind(),
                ErrorKind::PermanentDependency
            );
        }
        let error: ApplicationError =
            GitHubApiError::RateLimited { endpoint: endpoint(), retry_after_secs: Some(60) }.into();
        assert!(error.is_retryable());
    }
}

//! Webhook payloads for the two event families prsync follows.
//!
//! Only the fields the processors read are modelled; everything else in the
//! delivery is ignored by serde.

use prsync_core::{PrState, RepoFullName, ReviewOutcome, TerminalState};
use serde::Deserialize;
use thiserror::Error;

pub const PULL_REQUEST_EVENT: &str = "pull_request";
pub const PULL_REQUEST_REVIEW_EVENT: &str = "pull_request_review";

/// Event types that produce work. Everything else (`ping`, `push`, ...) is
/// acknowledged without enqueueing.
pub fn is_tracked_event(event_type: &str) -> bool {
    matches!(event_type, PULL_REQUEST_EVENT | PULL_REQUEST_REVIEW_EVENT)
}

#[derive(Debug, Error)]
pub enum GitHubEventError {
    #[error("`{event_type}` payload could not be decoded: {source}")]
    Decode {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("repository `{0}` is not an owner/repo name")]
    InvalidRepository(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GitHubEvent {
    PullRequest(PullRequestEvent),
    PullRequestReview(PullRequestReviewEvent),
    Unsupported { event_type: String },
}

impl GitHubEvent {
    pub fn parse(event_type: &str, payload: &serde_json::Value) -> Result<Self, GitHubEventError> {
        match event_type {
            PULL_REQUEST_EVENT => {
                let raw: RawPullRequestEvent = decode(event_type, payload)?;
                Ok(Self::PullRequest(PullRequestEvent {
                    action: PullRequestAction::parse(&raw.action),
                    repo: repo_name(&raw.repository.full_name)?,
                    pull_request: raw.pull_request,
                }))
            }
            PULL_REQUEST_REVIEW_EVENT => {
                let raw: RawReviewEvent = decode(event_type, payload)?;
                Ok(Self::PullRequestReview(PullRequestReviewEvent {
                    action: ReviewAction::parse(&raw.action),
                    repo: repo_name(&raw.repository.full_name)?,
                    review_state: raw.review.state,
                    reviewer_login: raw.review.user.map(|user| user.login),
                    pull_request: raw.pull_request,
                }))
            }
            other => Ok(Self::Unsupported { event_type: other.to_owned() }),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<T, GitHubEventError> {
    T::deserialize(payload)
        .map_err(|source| GitHubEventError::Decode { event_type: event_type.to_owned(), source })
}

fn repo_name(full_name: &str) -> Result<RepoFullName, GitHubEventError> {
    RepoFullName::parse(full_name)
        .ok_or_else(|| GitHubEventError::InvalidRepository(full_name.to_owned()))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PullRequestAction {
    Opened,
    ReadyForReview,
    Closed,
    Reopened,
    Other(String),
}

impl PullRequestAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "opened" => Self::Opened,
            "ready_for_review" => Self::ReadyForReview,
            "closed" => Self::Closed,
            "reopened" => Self::Reopened,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Opened => "opened",
            Self::ReadyForReview => "ready_for_review",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::Other(action) => action,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReviewAction {
    Submitted,
    Dismissed,
    Other(String),
}

impl ReviewAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "submitted" => Self::Submitted,
            "dismissed" => Self::Dismissed,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Submitted => "submitted",
            Self::Dismissed => "dismissed",
            Self::Other(action) => action,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub repo: RepoFullName,
    pub pull_request: PullRequestPayload,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullRequestReviewEvent {
    pub action: ReviewAction,
    pub repo: RepoFullName,
    /// Raw `review.state` (`approved`, `changes_requested`, `commented`, `dismissed`).
    pub review_state: String,
    pub reviewer_login: Option<String>,
    pub pull_request: PullRequestPayload,
}

impl PullRequestReviewEvent {
    pub fn outcome(&self) -> Option<ReviewOutcome> {
        ReviewOutcome::parse(&self.review_state)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PullRequestPayload {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default)]
    pub merged: Option<bool>,
    #[serde(default)]
    pub draft: bool,
    pub user: Actor,
}

impl PullRequestPayload {
    pub fn pr_state(&self) -> PrState {
        PrState::from_parts(&self.state, self.merged.unwrap_or(false))
    }

    pub fn terminal(&self) -> Option<TerminalState> {
        self.pr_state().terminal()
    }

    pub fn author_login(&self) -> &str {
        &self.user.login
    }
}

fn default_state() -> String {
    "open".to_owned()
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Actor {
    pub login: String,
}

#[derive(Deserialize)]
struct RawRepository {
    full_name: String,
}

#[derive(Deserialize)]
struct RawPullRequestEvent {
    action: String,
    pull_request: PullRequestPayload,
    repository: RawRepository,
}

#[derive(Deserialize)]
struct RawReviewEvent {
    action: String,
    review: RawReview,
    pull_request: PullRequestPayload,
    repository: RawRepository,
}

#[derive(Deserialize)]
struct RawReview {
    state: String,
    user: Option<Actor>,
}

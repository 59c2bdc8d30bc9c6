//! GitHub side of prsync
//!
//! - **Webhooks** (`events`) - typed `pull_request` and `pull_request_review` payloads
//! - **REST** (`client`) - live pull request and review state, used to re-derive reactions
//! - **Doubles** (`memory`) - in-memory GitHub for tests

pub mod client;
pub mod events;
pub mod memory;

pub use client::{GitHubApi, GitHubApiError, HttpGitHubClient, PullRequestSnapshot};
pub use events::{
    is_tracked_event, GitHubEvent, GitHubEventError, PullRequestAction, PullRequestEvent,
    PullRequestPayload, PullRequestReviewEvent, ReviewAction,
};
pub use memory::InMemoryGitHubApi;

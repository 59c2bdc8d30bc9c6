use prsync_core::{ApplicationError, ErrorKind};
use prsync_db::{QueueError, RepositoryError};
use prsync_github::{GitHubApiError, GitHubEventError};
use prsync_slack::SlackApiError;
use thiserror::Error;

/// Everything a processor can fail with, reduced to an [`ErrorKind`] before
/// the dispatcher decides between retry, failure and abandonment.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("webhook payload rejected: {0}")]
    Payload(#[from] GitHubEventError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Slack(#[from] SlackApiError),
    #[error(transparent)]
    GitHub(#[from] GitHubApiError),
    #[error("all {attempted} workspace notification(s) failed; last error: {last}")]
    AllWorkspacesFailed { attempted: usize, last: ApplicationError },
    #[error("processing deadline of {secs}s exceeded")]
    DeadlineExceeded { secs: u64 },
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Payload(_) => ErrorKind::Validation,
            Self::Repository(error) => error.kind(),
            Self::Queue(error) => error.kind(),
            Self::Slack(error) => error.kind(),
            Self::GitHub(error) => error.kind(),
            Self::AllWorkspacesFailed { last, .. } => last.kind(),
            Self::DeadlineExceeded { .. } => ErrorKind::TransientDependency,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<JobError> for ApplicationError {
    fn from(error: JobError) -> Self {
        match error {
            JobError::DeadlineExceeded { secs } => ApplicationError::DeadlineExceeded { secs },
            other => ApplicationError::from_kind(other.kind(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use prsync_core::{ApplicationError, ErrorKind};
    use prsync_github::GitHubApiError;
    use prsync_slack::SlackApiError;

    use super::JobError;

    #[test]
    fn classification_follows_the_underlying_dependency() {
        let rate_limited = JobError::from(SlackApiError::RateLimited {
            method: "reactions.add",
            retry_after_secs: None,
        });
        assert!(rate_limited.is_retryable());

        let not_found = JobError::from(GitHubApiError::Http {
            endpoint: "/repos/acme/api/pulls/1".to_owned(),
            status: 404,
        });
        assert_eq!(not_found.kind(), ErrorKind::PermanentDependency);

        assert!(JobError::DeadlineExceeded { secs: 300 }.is_retryable());
        assert_eq!(
            ApplicationError::from(JobError::DeadlineExceeded { secs: 300 }),
            ApplicationError::DeadlineExceeded { secs: 300 }
        );
    }
}

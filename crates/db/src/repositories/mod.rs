use async_trait::async_trait;
use thiserror::Error;

use prsync_core::domain::identity::UserLink;
use prsync_core::domain::repository::{RepoFullName, RepoRegistration};
use prsync_core::domain::tracked_message::{
    BotMessageReservation, ReservationOutcome, TrackedMessage, TrackedMessageId,
};
use prsync_core::domain::workspace::{
    ChannelConfig, ChannelId, MessageTs, SlackUserId, WorkspaceId, WorkspaceInstallation,
};
use prsync_core::errors::{ApplicationError, ErrorKind};

pub mod channel_config;
pub mod installation;
pub mod memory;
pub mod registration;
mod rows;
pub mod tracked_message;
pub mod user_link;

pub use channel_config::SqlChannelConfigRepository;
pub use installation::SqlInstallationRepository;
pub use memory::{
    InMemoryChannelConfigRepository, InMemoryInstallationRepository,
    InMemoryRepoRegistrationRepository, InMemoryTrackedMessageRepository,
    InMemoryUserLinkRepository,
};
pub use registration::SqlRepoRegistrationRepository;
pub use tracked_message::SqlTrackedMessageRepository;
pub use user_link::SqlUserLinkRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Database(error) => classify_sqlx(error),
            Self::Decode(_) => ErrorKind::PermanentDependency,
        }
    }
}

/// Connectivity and lock contention are worth retrying; constraint and
/// schema errors are not.
pub(crate) fn classify_sqlx(error: &sqlx::Error) -> ErrorKind {
    match error {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::WorkerCrashed => ErrorKind::TransientDependency,
        sqlx::Error::RowNotFound => ErrorKind::NotFound,
        sqlx::Error::Database(database) => {
            // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
            let busy = database
                .code()
                .and_then(|code| code.parse::<i64>().ok())
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false);
            if busy {
                ErrorKind::TransientDependency
            } else {
                ErrorKind::PermanentDependency
            }
        }
        _ => ErrorKind::PermanentDependency,
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::from_kind(error.kind(), error.to_string())
    }
}

#[async_trait]
pub trait TrackedMessageRepository: Send + Sync {
    /// Atomically claims the bot notification slot for (repo, PR, channel,
    /// workspace). Exactly one concurrent caller observes `Reserved`.
    async fn reserve_bot_message(
        &self,
        reservation: &BotMessageReservation,
    ) -> Result<ReservationOutcome, RepositoryError>;

    async fn attach_message_ts(
        &self,
        id: &TrackedMessageId,
        message_ts: &MessageTs,
    ) -> Result<(), RepositoryError>;

    /// Drops a reservation that never received a message timestamp.
    async fn release_reservation(&self, id: &TrackedMessageId) -> Result<(), RepositoryError>;

    /// Conditionally creates a manual row and returns the stored row, whether
    /// it was created now or by an earlier delivery.
    async fn insert_manual(&self, message: TrackedMessage)
        -> Result<TrackedMessage, RepositoryError>;

    async fn find_by_id(
        &self,
        id: &TrackedMessageId,
    ) -> Result<Option<TrackedMessage>, RepositoryError>;

    /// Posted, not-deleted messages for a PR across every workspace.
    async fn find_live_for_pr(
        &self,
        repo: &RepoFullName,
        pr_number: u64,
    ) -> Result<Vec<TrackedMessage>, RepositoryError>;

    async fn find_bot_message(
        &self,
        workspace_id: &WorkspaceId,
        channel_id: &ChannelId,
        message_ts: &MessageTs,
    ) -> Result<Option<TrackedMessage>, RepositoryError>;

    /// Returns true only for the call that flipped the flag.
    async fn mark_deleted_by_user(&self, id: &TrackedMessageId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait RepoRegistrationRepository: Send + Sync {
    async fn list_enabled_for_repo(
        &self,
        repo: &RepoFullName,
    ) -> Result<Vec<RepoRegistration>, RepositoryError>;

    async fn list_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<RepoRegistration>, RepositoryError>;

    /// Inserts only when no registration exists for (repo, workspace).
    async fn register_if_absent(
        &self,
        registration: RepoRegistration,
    ) -> Result<bool, RepositoryError>;

    /// Admin registration: re-enables and keeps an existing default channel
    /// unless a new one is given.
    async fn upsert(&self, registration: RepoRegistration) -> Result<(), RepositoryError>;

    async fn set_enabled(
        &self,
        repo: &RepoFullName,
        workspace_id: &WorkspaceId,
        enabled: bool,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ChannelConfigRepository: Send + Sync {
    async fn find(
        &self,
        workspace_id: &WorkspaceId,
        channel_id: &ChannelId,
    ) -> Result<Option<ChannelConfig>, RepositoryError>;

    async fn upsert(&self, config: ChannelConfig) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserLinkRepository: Send + Sync {
    /// A GitHub login may be linked in several workspaces.
    async fn find_by_github_login(&self, login: &str) -> Result<Vec<UserLink>, RepositoryError>;

    async fn find_by_slack_user(
        &self,
        workspace_id: &WorkspaceId,
        slack_user_id: &SlackUserId,
    ) -> Result<Option<UserLink>, RepositoryError>;

    async fn upsert(&self, link: UserLink) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait InstallationRepository: Send + Sync {
    async fn find(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<WorkspaceInstallation>, RepositoryError>;

    async fn upsert(&self, installation: WorkspaceInstallation) -> Result<(), RepositoryError>;
}

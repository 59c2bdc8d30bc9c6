use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use prsync_core::domain::identity::UserLink;
use prsync_core::domain::repository::{RepoFullName, RepoRegistration};
use prsync_core::domain::tracked_message::{
    BotMessageReservation, MessageSource, ReservationOutcome, TrackedMessage, TrackedMessageId,
};
use prsync_core::domain::workspace::{
    ChannelConfig, ChannelId, MessageTs, SlackUserId, WorkspaceId, WorkspaceInstallation,
};

use super::{
    ChannelConfigRepository, InstallationRepository, RepoRegistrationRepository,
    RepositoryError, TrackedMessageRepository, UserLinkRepository,
};

#[derive(Clone, Debug)]
struct StoredMessage {
    message: TrackedMessage,
    posted: bool,
}

/// Keeps reservations (`posted == false`) next to posted rows, mirroring the
/// nullable `message_ts` column of the SQL table.
#[derive(Default)]
pub struct InMemoryTrackedMessageRepository {
    rows: RwLock<Vec<StoredMessage>>,
}

impl InMemoryTrackedMessageRepository {
    /// Every posted row, including deleted ones, for assertions in tests.
    pub async fn all(&self) -> Vec<TrackedMessage> {
        let rows = self.rows.read().await;
        rows.iter().filter(|row| row.posted).map(|row| row.message.clone()).collect()
    }

    pub async fn pending_reservations(&self) -> usize {
        let rows = self.rows.read().await;
        rows.iter().filter(|row| !row.posted).count()
    }
}

#[async_trait::async_trait]
impl TrackedMessageRepository for InMemoryTrackedMessageRepository {
    async fn reserve_bot_message(
        &self,
        reservation: &BotMessageReservation,
    ) -> Result<ReservationOutcome, RepositoryError> {
        let mut rows = self.rows.write().await;
        let taken = rows.iter().any(|row| {
            row.message.source == MessageSource::Bot
                && row.message.repo == reservation.repo
                && row.message.pr_number == reservation.pr_number
                && row.message.channel_id == reservation.channel_id
                && row.message.workspace_id == reservation.workspace_id
        });
        if taken {
            return Ok(ReservationOutcome::AlreadyTracked);
        }

        rows.push(StoredMessage {
            message: TrackedMessage {
                id: reservation.id.clone(),
                repo: reservation.repo.clone(),
                pr_number: reservation.pr_number,
                workspace_id: reservation.workspace_id.clone(),
                channel_id: reservation.channel_id.clone(),
                message_ts: MessageTs(String::new()),
                source: MessageSource::Bot,
                author_login: reservation.author_login.clone(),
                deleted_by_user: false,
                created_at: reservation.reserved_at,
            },
            posted: false,
        });
        Ok(ReservationOutcome::Reserved(reservation.id.clone()))
    }

    async fn attach_message_ts(
        &self,
        id: &TrackedMessageId,
        message_ts: &MessageTs,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|row| &row.message.id == id && !row.posted)
            .ok_or(RepositoryError::Database(sqlx::Error::RowNotFound))?;
        row.message.message_ts = message_ts.clone();
        row.posted = true;
        Ok(())
    }

    async fn release_reservation(&self, id: &TrackedMessageId) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write().await;
        rows.retain(|row| !(&row.message.id == id && !row.posted));
        Ok(())
    }

    async fn insert_manual(
        &self,
        message: TrackedMessage,
    ) -> Result<TrackedMessage, RepositoryError> {
        let mut rows = self.rows.write().await;
        let existing = rows.iter().find(|row| {
            row.message.source == MessageSource::Manual
                && row.message.workspace_id == message.workspace_id
                && row.message.channel_id == message.channel_id
                && row.message.message_ts == message.message_ts
                && row.message.repo == message.repo
                && row.message.pr_number == message.pr_number
        });
        if let Some(existing) = existing {
            return Ok(existing.message.clone());
        }

        rows.push(StoredMessage { message: message.clone(), posted: true });
        Ok(message)
    }

    async fn find_by_id(
        &self,
        id: &TrackedMessageId,
    ) -> Result<Option<TrackedMessage>, RepositoryError> {
        let rows = self.rows.read().await;
        Ok(rows.iter().find(|row| row.posted && &row.message.id == id).map(|row| row.message.clone()))
    }

    async fn find_live_for_pr(
        &self,
        repo: &RepoFullName,
        pr_number: u64,
    ) -> Result<Vec<TrackedMessage>, RepositoryError> {
        let rows = self.rows.read().await;
        let mut live: Vec<TrackedMessage> = rows
            .iter()
            .filter(|row| {
                row.posted
                    && !row.message.deleted_by_user
                    && &row.message.repo == repo
                    && row.message.pr_number == pr_number
            })
            .map(|row| row.message.clone())
            .collect();
        live.sort_by(|left, right| {
            left.workspace_id.cmp(&right.workspace_id).then(left.created_at.cmp(&right.created_at))
        });
        Ok(live)
    }

    async fn find_bot_message(
        &self,
        workspace_id: &WorkspaceId,
        channel_id: &ChannelId,
        message_ts: &MessageTs,
    ) -> Result<Option<TrackedMessage>, RepositoryError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|row| {
                row.posted
                    && row.message.source == MessageSource::Bot
                    && &row.message.workspace_id == workspace_id
                    && &row.message.channel_id == channel_id
                    && &row.message.message_ts == message_ts
            })
            .map(|row| row.message.clone()))
    }

    async fn mark_deleted_by_user(&self, id: &TrackedMessageId) -> Result<bool, RepositoryError> {
        let mut rows = self.rows.write().await;
        match rows.iter_mut().find(|row| &row.message.id == id && !row.message.deleted_by_user) {
            Some(row) => {
                row.message.deleted_by_user = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryRepoRegistrationRepository {
    registrations: RwLock<HashMap<(String, String), RepoRegistration>>,
}

#[async_trait::async_trait]
impl RepoRegistrationRepository for InMemoryRepoRegistrationRepository {
    async fn list_enabled_for_repo(
        &self,
        repo: &RepoFullName,
    ) -> Result<Vec<RepoRegistration>, RepositoryError> {
        let registrations = self.registrations.read().await;
        let mut found: Vec<RepoRegistration> = registrations
            .values()
            .filter(|registration| &registration.repo == repo && registration.enabled)
            .cloned()
            .collect();
        found.sort_by(|left, right| left.workspace_id.cmp(&right.workspace_id));
        Ok(found)
    }

    async fn list_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<RepoRegistration>, RepositoryError> {
        let registrations = self.registrations.read().await;
        let mut found: Vec<RepoRegistration> = registrations
            .values()
            .filter(|registration| &registration.workspace_id == workspace_id)
            .cloned()
            .collect();
        found.sort_by(|left, right| left.repo.cmp(&right.repo));
        Ok(found)
    }

    async fn register_if_absent(
        &self,
        registration: RepoRegistration,
    ) -> Result<bool, RepositoryError> {
        let mut registrations = self.registrations.write().await;
        let key = (registration.repo.0.clone(), registration.workspace_id.0.clone());
        if registrations.contains_key(&key) {
            return Ok(false);
        }
        registrations.insert(key, registration);
        Ok(true)
    }

    async fn upsert(&self, registration: RepoRegistration) -> Result<(), RepositoryError> {
        let mut registrations = self.registrations.write().await;
        let key = (registration.repo.0.clone(), registration.workspace_id.0.clone());
        match registrations.get_mut(&key) {
            Some(existing) => {
                existing.enabled = registration.enabled;
                if registration.default_channel_id.is_some() {
                    existing.default_channel_id = registration.default_channel_id;
                }
                existing.updated_at = registration.updated_at;
            }
            None => {
                registrations.insert(key, registration);
            }
        }
        Ok(())
    }

    async fn set_enabled(
        &self,
        repo: &RepoFullName,
        workspace_id: &WorkspaceId,
        enabled: bool,
    ) -> Result<bool, RepositoryError> {
        let mut registrations = self.registrations.write().await;
        match registrations.get_mut(&(repo.0.clone(), workspace_id.0.clone())) {
            Some(existing) => {
                existing.enabled = enabled;
                existing.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryChannelConfigRepository {
    configs: RwLock<HashMap<(String, String), ChannelConfig>>,
}

#[async_trait::async_trait]
impl ChannelConfigRepository for InMemoryChannelConfigRepository {
    async fn find(
        &self,
        workspace_id: &WorkspaceId,
        channel_id: &ChannelId,
    ) -> Result<Option<ChannelConfig>, RepositoryError> {
        let configs = self.configs.read().await;
        Ok(configs.get(&(workspace_id.0.clone(), channel_id.0.clone())).cloned())
    }

    async fn upsert(&self, config: ChannelConfig) -> Result<(), RepositoryError> {
        let mut configs = self.configs.write().await;
        configs.insert((config.workspace_id.0.clone(), config.channel_id.0.clone()), config);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserLinkRepository {
    links: RwLock<HashMap<(String, String), UserLink>>,
}

#[async_trait::async_trait]
impl UserLinkRepository for InMemoryUserLinkRepository {
    async fn find_by_github_login(&self, login: &str) -> Result<Vec<UserLink>, RepositoryError> {
        let links = self.links.read().await;
        let mut found: Vec<UserLink> = links
            .values()
            .filter(|link| link.github_login.eq_ignore_ascii_case(login.trim()))
            .cloned()
            .collect();
        found.sort_by(|left, right| {
            left.workspace_id
                .cmp(&right.workspace_id)
                .then(left.slack_user_id.0.cmp(&right.slack_user_id.0))
        });
        Ok(found)
    }

    async fn find_by_slack_user(
        &self,
        workspace_id: &WorkspaceId,
        slack_user_id: &SlackUserId,
    ) -> Result<Option<UserLink>, RepositoryError> {
        let links = self.links.read().await;
        Ok(links.get(&(workspace_id.0.clone(), slack_user_id.0.clone())).cloned())
    }

    async fn upsert(&self, link: UserLink) -> Result<(), RepositoryError> {
        let mut links = self.links.write().await;
        links.insert((link.workspace_id.0.clone(), link.slack_user_id.0.clone()), link);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryInstallationRepository {
    installations: RwLock<HashMap<String, WorkspaceInstallation>>,
}

#[async_trait::async_trait]
impl InstallationRepository for InMemoryInstallationRepository {
    async fn find(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<WorkspaceInstallation>, RepositoryError> {
        let installations = self.installations.read().await;
        Ok(installations.get(&workspace_id.0).cloned())
    }

    async fn upsert(&self, installation: WorkspaceInstallation) -> Result<(), RepositoryError> {
        let mut installations = self.installations.write().await;
        installations.insert(installation.workspace_id.0.clone(), installation);
        Ok(())
    }
}

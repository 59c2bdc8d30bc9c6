use std::sync::Arc;

use prsync_core::reaction::ReactionVocabulary;
use prsync_db::{
    repositories::{
        ChannelConfigRepository, InstallationRepository, RepoRegistrationRepository,
        TrackedMessageRepository, UserLinkRepository,
    },
    JobQueue,
};
use prsync_github::GitHubApi;
use prsync_slack::SlackApi;

use crate::worker::{locks::MessageLocks, reaction_sync::ReactionSyncEngine};

#[derive(Clone)]
pub struct Repositories {
    pub tracked_messages: Arc<dyn TrackedMessageRepository>,
    pub registrations: Arc<dyn RepoRegistrationRepository>,
    pub channel_configs: Arc<dyn ChannelConfigRepository>,
    pub user_links: Arc<dyn UserLinkRepository>,
    pub installations: Arc<dyn InstallationRepository>,
}

/// Collaborators shared by ingress handlers and job processors. All decision
/// state is fetched fresh through these on every job.
#[derive(Clone)]
pub struct Services {
    pub repos: Repositories,
    pub queue: Arc<dyn JobQueue>,
    pub slack: Arc<dyn SlackApi>,
    pub github: Arc<dyn GitHubApi>,
    pub reactions: ReactionVocabulary,
    /// Host matched when scanning chat text for pull request links.
    pub web_host: String,
    pub sync: ReactionSyncEngine,
}

impl Services {
    pub fn new(
        repos: Repositories,
        queue: Arc<dyn JobQueue>,
        slack: Arc<dyn SlackApi>,
        github: Arc<dyn GitHubApi>,
        reactions: ReactionVocabulary,
        web_host: impl Into<String>,
    ) -> Self {
        let sync = ReactionSyncEngine::new(slack.clone(), reactions.clone(), MessageLocks::new());
        Self { repos, queue, slack, github, reactions, web_host: web_host.into(), sync }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Arc;

    use chrono::Utc;
    use prsync_core::{
        links::DEFAULT_WEB_HOST, reaction::ReactionVocabulary, ChannelId, RepoFullName,
        RepoRegistration, SlackUserId, UserLink, WorkspaceId,
    };
    use prsync_db::{
        repositories::{
            InMemoryChannelConfigRepository, InMemoryInstallationRepository,
            InMemoryRepoRegistrationRepository, InMemoryTrackedMessageRepository,
            InMemoryUserLinkRepository, RepoRegistrationRepository, UserLinkRepository,
        },
        InMemoryJobQueue,
    };
    use prsync_github::InMemoryGitHubApi;
    use prsync_slack::InMemorySlackApi;

    use super::{Repositories, Services};

    /// In-memory wiring with typed handles on every double.
    pub struct Harness {
        pub services: Services,
        pub tracked: Arc<InMemoryTrackedMessageRepository>,
        pub registrations: Arc<InMemoryRepoRegistrationRepository>,
        pub channel_configs: Arc<InMemoryChannelConfigRepository>,
        pub user_links: Arc<InMemoryUserLinkRepository>,
        pub queue: Arc<InMemoryJobQueue>,
        pub slack: Arc<InMemorySlackApi>,
        pub github: Arc<InMemoryGitHubApi>,
    }

    impl Harness {
        pub fn new() -> Self {
            let tracked = Arc::new(InMemoryTrackedMessageRepository::default());
            let registrations = Arc::new(InMemoryRepoRegistrationRepository::default());
            let channel_configs = Arc::new(InMemoryChannelConfigRepository::default());
            let user_links = Arc::new(InMemoryUserLinkRepository::default());
            let installations = Arc::new(InMemoryInstallationRepository::default());
            let queue = Arc::new(InMemoryJobQueue::default());
            let slack = Arc::new(InMemorySlackApi::new());
            let github = Arc::new(InMemoryGitHubApi::new());

            let services = Services::new(
                Repositories {
                    tracked_messages: tracked.clone(),
                    registrations: registrations.clone(),
                    channel_configs: channel_configs.clone(),
                    user_links: user_links.clone(),
                    installations,
                },
                queue.clone(),
                slack.clone(),
                github.clone(),
                ReactionVocabulary::default(),
                DEFAULT_WEB_HOST,
            );

            Self { services, tracked, registrations, channel_configs, user_links, queue, slack, github }
        }

        pub async fn register(&self, repo: &str, workspace: &str, default_channel: Option<&str>) {
            self.registrations
                .upsert(RepoRegistration::new(
                    RepoFullName::new(repo),
                    WorkspaceId(workspace.to_owned()),
                    default_channel.map(|channel| ChannelId(channel.to_owned())),
                ))
                .await
                .expect("register repo");
        }

        pub async fn link_user(
            &self,
            workspace: &str,
            slack_user: &str,
            github_login: &str,
            default_channel: Option<&str>,
        ) {
            self.user_links
                .upsert(UserLink {
                    workspace_id: WorkspaceId(workspace.to_owned()),
                    slack_user_id: SlackUserId(slack_user.to_owned()),
                    github_login: github_login.to_owned(),
                    verified: true,
                    default_channel_id: default_channel.map(|channel| ChannelId(channel.to_owned())),
                    notifications_enabled: true,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
                .await
                .expect("link user");
        }
    }
}

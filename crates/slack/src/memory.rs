use std::{
    collections::{BTreeSet, HashMap},
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use prsync_core::{
    reaction::normalize_reaction, ChannelId, MessageTarget, MessageTs, WorkspaceId,
};
use tokio::sync::RwLock;

use crate::{
    blocks::MessageTemplate,
    client::{PostedMessage, ReactionChange, SlackApi, SlackApiError},
};

type MessageKey = (WorkspaceId, ChannelId, MessageTs);

#[derive(Clone, Debug, Default)]
struct FakeMessage {
    bot_reactions: BTreeSet<String>,
    deleted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedPost {
    pub workspace_id: WorkspaceId,
    pub channel_id: ChannelId,
    pub message_ts: MessageTs,
    pub template: MessageTemplate,
}

/// Slack double holding every workspace in memory.
///
/// Reactions on messages it has never seen are accepted, so user-posted
/// messages need no seeding. Failures can be injected per workspace.
#[derive(Default)]
pub struct InMemorySlackApi {
    messages: RwLock<HashMap<MessageKey, FakeMessage>>,
    posts: RwLock<Vec<RecordedPost>>,
    channels: RwLock<HashMap<(WorkspaceId, String), ChannelId>>,
    failures: RwLock<HashMap<WorkspaceId, SlackApiError>>,
    failing_reaction_reads: RwLock<bool>,
    mutations: AtomicU64,
    next_ts: AtomicU64,
}

impl InMemorySlackApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent call for `workspace` fails with `error`.
    pub async fn fail_workspace(&self, workspace: &WorkspaceId, error: SlackApiError) {
        self.failures.write().await.insert(workspace.clone(), error);
    }

    pub async fn clear_failure(&self, workspace: &WorkspaceId) {
        self.failures.write().await.remove(workspace);
    }

    pub async fn fail_reaction_reads(&self, failing: bool) {
        *self.failing_reaction_reads.write().await = failing;
    }

    pub async fn add_channel(&self, workspace: &WorkspaceId, name: &str, id: &str) {
        self.channels
            .write()
            .await
            .insert((workspace.clone(), name.to_ascii_lowercase()), ChannelId(id.to_owned()));
    }

    pub async fn reactions_on(
        &self,
        workspace: &WorkspaceId,
        target: &MessageTarget,
    ) -> BTreeSet<String> {
        self.messages
            .read()
            .await
            .get(&key(workspace, target))
            .map(|message| message.bot_reactions.clone())
            .unwrap_or_default()
    }

    pub async fn is_deleted(&self, workspace: &WorkspaceId, target: &MessageTarget) -> bool {
        self.messages
            .read()
            .await
            .get(&key(workspace, target))
            .map(|message| message.deleted)
            .unwrap_or(false)
    }

    pub async fn posts(&self) -> Vec<RecordedPost> {
        self.posts.read().await.clone()
    }

    /// Number of reaction add/remove calls that reached the double.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    async fn check(&self, workspace: &WorkspaceId) -> Result<(), SlackApiError> {
        match self.failures.read().await.get(workspace) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn key(workspace: &WorkspaceId, target: &MessageTarget) -> MessageKey {
    (workspace.clone(), target.channel_id.clone(), target.message_ts.clone())
}

#[async_trait]
impl SlackApi for InMemorySlackApi {
    async fn post_message(
        &self,
        workspace: &WorkspaceId,
        channel: &ChannelId,
        message: &MessageTemplate,
    ) -> Result<PostedMessage, SlackApiError> {
        self.check(workspace).await?;
        let sequence = self.next_ts.fetch_add(1, Ordering::SeqCst) + 1;
        let message_ts = MessageTs(format!("1730000000.{sequence:06}"));

        self.messages.write().await.insert(
            (workspace.clone(), channel.clone(), message_ts.clone()),
            FakeMessage::default(),
        );
        self.posts.write().await.push(RecordedPost {
            workspace_id: workspace.clone(),
            channel_id: channel.clone(),
            message_ts: message_ts.clone(),
            template: message.clone(),
        });
        Ok(PostedMessage { channel_id: channel.clone(), message_ts })
    }

    async fn add_reaction(
        &self,
        workspace: &WorkspaceId,
        target: &MessageTarget,
        name: &str,
    ) -> Result<ReactionChange, SlackApiError> {
        self.check(workspace).await?;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut messages = self.messages.write().await;
        let message = messages.entry(key(workspace, target)).or_default();
        if message.deleted {
            return Err(SlackApiError::Api {
                method: "reactions.add",
                code: "message_not_found".to_owned(),
            });
        }
        Ok(if message.bot_reactions.insert(normalize_reaction(name)) {
            ReactionChange::Applied
        } else {
            ReactionChange::AlreadyInState
        })
    }

    async fn remove_reaction(
        &self,
        workspace: &WorkspaceId,
        target: &MessageTarget,
        name: &str,
    ) -> Result<ReactionChange, SlackApiError> {
        self.check(workspace).await?;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut messages = self.messages.write().await;
        let removed = messages
            .get_mut(&key(workspace, target))
            .map(|message| message.bot_reactions.remove(&normalize_reaction(name)))
            .unwrap_or(false);
        Ok(if removed { ReactionChange::Applied } else { ReactionChange::AlreadyInState })
    }

    async fn bot_reactions(
        &self,
        workspace: &WorkspaceId,
        target: &MessageTarget,
    ) -> Result<BTreeSet<String>, SlackApiError> {
        self.check(workspace).await?;
        if *self.failing_reaction_reads.read().await {
            return Err(SlackApiError::Http { method: "reactions.get", status: 500 });
        }
        Ok(self.reactions_on(workspace, target).await)
    }

    async fn delete_message(
        &self,
        workspace: &WorkspaceId,
        target: &MessageTarget,
    ) -> Result<(), SlackApiError> {
        self.check(workspace).await?;
        if let Some(message) = self.messages.write().await.get_mut(&key(workspace, target)) {
            message.deleted = true;
            message.bot_reactions.clear();
        }
        Ok(())
    }

    async fn resolve_channel(
        &self,
        workspace: &WorkspaceId,
        name: &str,
    ) -> Result<Option<ChannelId>, SlackApiError> {
        self.check(workspace).await?;
        let name = name.trim().trim_start_matches('#').to_ascii_lowercase();
        Ok(self.channels.read().await.get(&(workspace.clone(), name)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use prsync_core::{ChannelId, MessageTarget, MessageTs, WorkspaceId};

    use super::InMemorySlackApi;
    use crate::{
        blocks::MessageBuilder,
        client::{ReactionChange, SlackApi, SlackApiError},
    };

    fn target() -> MessageTarget {
        MessageTarget {
            channel_id: ChannelId("C1".to_owned()),
            message_ts: MessageTs("1.0".to_owned()),
        }
    }

    #[tokio::test]
    async fn reaction_mutations_are_idempotent() {
        let slack = InMemorySlackApi::new();
        let workspace = WorkspaceId("T1".to_owned());

        assert_eq!(
            slack.add_reaction(&workspace, &target(), ":tada:").await.expect("add"),
            ReactionChange::Applied
        );
        assert_eq!(
            slack.add_reaction(&workspace, &target(), "tada").await.expect("add again"),
            ReactionChange::AlreadyInState
        );
        assert_eq!(
            slack.remove_reaction(&workspace, &target(), "warning").await.expect("remove"),
            ReactionChange::AlreadyInState
        );
        assert_eq!(slack.reactions_on(&workspace, &target()).await.len(), 1);
        assert_eq!(slack.mutation_count(), 3);
    }

    #[tokio::test]
    async fn injected_failures_are_scoped_to_one_workspace() {
        let slack = InMemorySlackApi::new();
        let broken = WorkspaceId("T-broken".to_owned());
        let healthy = WorkspaceId("T-ok".to_owned());
        slack
            .fail_workspace(&broken, SlackApiError::Http { method: "chat.postMessage", status: 502 })
            .await;
        let message = MessageBuilder::new("hello").build();

        assert!(slack.post_message(&broken, &ChannelId("C1".to_owned()), &message).await.is_err());
        let posted =
            slack.post_message(&healthy, &ChannelId("C1".to_owned()), &message).await.expect("post");
        assert_eq!(slack.posts().await.len(), 1);
        assert_eq!(slack.posts().await[0].message_ts, posted.message_ts);

        slack.clear_failure(&broken).await;
        assert!(slack.post_message(&broken, &ChannelId("C1".to_owned()), &message).await.is_ok());
    }

    #[tokio::test]
    async fn channel_names_resolve_per_workspace() {
        let slack = InMemorySlackApi::new();
        let workspace = WorkspaceId("T1".to_owned());
        slack.add_channel(&workspace, "backend", "C-backend").await;

        assert_eq!(
            slack.resolve_channel(&workspace, "#Backend").await.expect("resolve"),
            Some(ChannelId("C-backend".to_owned()))
        );
        assert_eq!(
            slack.resolve_channel(&WorkspaceId("T2".to_owned()), "backend").await.expect("resolve"),
            None
        );
    }
}

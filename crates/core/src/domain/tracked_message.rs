use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::repository::RepoFullName;
use crate::domain::workspace::{ChannelId, MessageTs, WorkspaceId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedMessageId(pub String);

impl TrackedMessageId {
    pub fn generate() -> Self {
        Self(format!("TM-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Bot,
    Manual,
}

impl MessageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bot" => Some(Self::Bot),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// One chat message believed to represent or reference a pull request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedMessage {
    pub id: TrackedMessageId,
    pub repo: RepoFullName,
    pub pr_number: u64,
    pub workspace_id: WorkspaceId,
    pub channel_id: ChannelId,
    pub message_ts: MessageTs,
    pub source: MessageSource,
    /// GitHub login of the PR author when the message was created.
    pub author_login: Option<String>,
    pub deleted_by_user: bool,
    pub created_at: DateTime<Utc>,
}

impl TrackedMessage {
    pub fn manual(
        repo: RepoFullName,
        pr_number: u64,
        workspace_id: WorkspaceId,
        channel_id: ChannelId,
        message_ts: MessageTs,
    ) -> Self {
        Self {
            id: TrackedMessageId::generate(),
            repo,
            pr_number,
            workspace_id,
            channel_id,
            message_ts,
            source: MessageSource::Manual,
            author_login: None,
            deleted_by_user: false,
            created_at: Utc::now(),
        }
    }

    pub fn target(&self) -> MessageTarget {
        MessageTarget { channel_id: self.channel_id.clone(), message_ts: self.message_ts.clone() }
    }

    /// Identity used to serialize reaction mutations on the same chat message.
    pub fn lock_key(&self) -> String {
        message_lock_key(&self.workspace_id, &self.channel_id, &self.message_ts)
    }

    /// Whether a user with the given GitHub login may delete this message.
    pub fn deletable_by(&self, github_login: &str) -> bool {
        self.source == MessageSource::Bot
            && !self.deleted_by_user
            && self
                .author_login
                .as_deref()
                .map(|author| author.eq_ignore_ascii_case(github_login.trim()))
                .unwrap_or(false)
    }
}

pub fn message_lock_key(workspace: &WorkspaceId, channel: &ChannelId, ts: &MessageTs) -> String {
    format!("{}/{}/{}", workspace.0, channel.0, ts.0)
}

/// A (channel, ts) pair inside a single workspace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageTarget {
    pub channel_id: ChannelId,
    pub message_ts: MessageTs,
}

/// Atomic claim on the right to post the bot notification for one
/// (repo, PR, channel, workspace). The message timestamp is attached after posting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotMessageReservation {
    pub id: TrackedMessageId,
    pub repo: RepoFullName,
    pub pr_number: u64,
    pub workspace_id: WorkspaceId,
    pub channel_id: ChannelId,
    pub author_login: Option<String>,
    pub reserved_at: DateTime<Utc>,
}

impl BotMessageReservation {
    pub fn new(
        repo: RepoFullName,
        pr_number: u64,
        workspace_id: WorkspaceId,
        channel_id: ChannelId,
        author_login: Option<String>,
    ) -> Self {
        Self {
            id: TrackedMessageId::generate(),
            repo,
            pr_number,
            workspace_id,
            channel_id,
            author_login,
            reserved_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReservationOutcome {
    Reserved(TrackedMessageId),
    AlreadyTracked,
}

#[cfg(test)]
mod tests {
    use super::{MessageSource, TrackedMessage};
    use crate::domain::repository::RepoFullName;
    use crate::domain::workspace::{ChannelId, MessageTs, WorkspaceId};

    fn bot_message(author: Option<&str>) -> TrackedMessage {
        let mut message = TrackedMessage::manual(
            RepoFullName::new("o/r"),
            42,
            WorkspaceId("T1".to_string()),
            ChannelId("C1".to_string()),
            MessageTs("1700000000.000100".to_string()),
        );
        message.source = MessageSource::Bot;
        message.author_login = author.map(str::to_string);
        message
    }

    #[test]
    fn only_recorded_author_may_delete_bot_messages() {
        let message = bot_message(Some("Octocat"));
        assert!(message.deletable_by("octocat"));
        assert!(!message.deletable_by("mallory"));
        assert!(!bot_message(None).deletable_by("octocat"));
    }

    #[test]
    fn manual_and_already_deleted_messages_are_not_deletable() {
        let mut manual = bot_message(Some("octocat"));
        manual.source = MessageSource::Manual;
        assert!(!manual.deletable_by("octocat"));

        let mut deleted = bot_message(Some("octocat"));
        deleted.deleted_by_user = true;
        assert!(!deleted.deletable_by("octocat"));
    }

    #[test]
    fn lock_key_combines_workspace_channel_and_ts() {
        assert_eq!(bot_message(None).lock_key(), "T1/C1/1700000000.000100");
    }
}

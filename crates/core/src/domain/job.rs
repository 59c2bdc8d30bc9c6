use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::repository::RepoFullName;
use crate::domain::tracked_message::TrackedMessageId;
use crate::domain::workspace::{ChannelId, MessageTs, SlackUserId, WorkspaceId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

/// Correlates log lines for one inbound event across ingress and worker.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub String);

impl JobId {
    pub fn generate() -> Self {
        Self(format!("JOB-{}", Uuid::new_v4().simple()))
    }
}

impl TraceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub trace_id: TraceId,
    pub enqueued_at: DateTime<Utc>,
    pub kind: JobKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    Webhook(WebhookJob),
    ManualLink(ManualLinkJob),
    ReactionSync(ReactionSyncJob),
    DeleteTrackedMessage(DeleteTrackedMessageJob),
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook(_) => "webhook",
            Self::ManualLink(_) => "manual_link",
            Self::ReactionSync(_) => "reaction_sync",
            Self::DeleteTrackedMessage(_) => "delete_tracked_message",
        }
    }
}

/// A verified GitHub delivery. The payload is kept opaque until the worker parses it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookJob {
    /// Preserved for correlation; not used for deduplication.
    pub delivery_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualLinkJob {
    pub workspace_id: WorkspaceId,
    pub channel_id: ChannelId,
    pub message_ts: MessageTs,
    pub user_id: SlackUserId,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSyncJob {
    pub tracked_message_id: TrackedMessageId,
    pub repo: RepoFullName,
    pub pr_number: u64,
    pub workspace_id: WorkspaceId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTrackedMessageJob {
    pub tracked_message_id: TrackedMessageId,
    pub workspace_id: WorkspaceId,
    pub requested_by: SlackUserId,
}

impl Job {
    pub fn new(trace_id: TraceId, kind: JobKind) -> Self {
        Self { id: JobId::generate(), trace_id, enqueued_at: Utc::now(), kind }
    }

    pub fn webhook(
        delivery_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let received_at = Utc::now();
        Self::new(
            TraceId::generate(),
            JobKind::Webhook(WebhookJob {
                delivery_id: delivery_id.into(),
                event_type: event_type.into(),
                payload,
                received_at,
            }),
        )
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::workspace::{ChannelId, SlackUserId, WorkspaceId};

/// Link between a Slack user in one workspace and a GitHub login.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLink {
    pub workspace_id: WorkspaceId,
    pub slack_user_id: SlackUserId,
    pub github_login: String,
    pub verified: bool,
    pub default_channel_id: Option<ChannelId>,
    pub notifications_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserLink {
    /// Personal default channel, usable only inside this link's own workspace.
    pub fn default_channel_in(&self, workspace: &WorkspaceId) -> Option<&ChannelId> {
        if !self.verified || &self.workspace_id != workspace {
            return None;
        }
        self.default_channel_id.as_ref()
    }

    pub fn can_auto_register(&self) -> bool {
        self.verified && self.notifications_enabled
    }
}

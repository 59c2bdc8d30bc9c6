use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkspaceId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlackUserId(pub String);

/// Slack message timestamp (`ts`), the platform's message identifier within a channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageTs(pub String);

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for SlackUserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for MessageTs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bot credentials for one tenant workspace, written by the OAuth install flow.
#[derive(Clone, Debug)]
pub struct WorkspaceInstallation {
    pub workspace_id: WorkspaceId,
    pub bot_token: SecretString,
    pub bot_user_id: Option<SlackUserId>,
    pub installed_at: DateTime<Utc>,
}

/// Per-channel switch for manual link tracking. A missing row means tracking is on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub workspace_id: WorkspaceId,
    pub channel_id: ChannelId,
    pub track_manual_links: bool,
    pub updated_at: DateTime<Utc>,
}

impl ChannelConfig {
    pub fn tracking_enabled(config: Option<&ChannelConfig>) -> bool {
        config.map(|config| config.track_manual_links).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ChannelConfig, ChannelId, WorkspaceId};

    #[test]
    fn absent_channel_config_defaults_to_tracking_enabled() {
        assert!(ChannelConfig::tracking_enabled(None));

        let disabled = ChannelConfig {
            workspace_id: WorkspaceId("T1".to_string()),
            channel_id: ChannelId("C1".to_string()),
            track_manual_links: false,
            updated_at: Utc::now(),
        };
        assert!(!ChannelConfig::tracking_enabled(Some(&disabled)));
    }
}

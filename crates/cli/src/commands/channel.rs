use chrono::Utc;
use prsync_core::domain::workspace::{ChannelConfig, ChannelId, WorkspaceId};
use prsync_db::repositories::{ChannelConfigRepository, SqlChannelConfigRepository};

use crate::commands::{required, with_database, CommandResult, StepError};

/// Turns manual PR link tracking on or off for one channel.
pub fn set_tracking(workspace: &str, channel: &str, enabled: bool) -> CommandResult {
    const COMMAND: &str = "channel tracking";
    let target = required("workspace", workspace)
        .and_then(|workspace| Ok((WorkspaceId(workspace), ChannelId(required("channel", channel)?))));
    let (workspace_id, channel_id) = match target {
        Ok(target) => target,
        Err(error) => return CommandResult::from_step(COMMAND, error),
    };

    with_database(COMMAND, |pool| async move {
        SqlChannelConfigRepository::new(pool)
            .upsert(ChannelConfig {
                workspace_id: workspace_id.clone(),
                channel_id: channel_id.clone(),
                track_manual_links: enabled,
                updated_at: Utc::now(),
            })
            .await
            .map_err(StepError::persistence)?;
        let state = if enabled { "enabled" } else { "disabled" };
        Ok(format!("manual link tracking {state} for {channel_id} in workspace {workspace_id}"))
    })
}

use chrono::Utc;
use prsync_core::domain::workspace::{SlackUserId, WorkspaceId, WorkspaceInstallation};
use prsync_db::repositories::{InstallationRepository, SqlInstallationRepository};
use secrecy::SecretString;

use crate::commands::{required, with_database, CommandResult, StepError};

/// Records bot credentials for a workspace, replacing any earlier install.
pub fn install(workspace: &str, bot_token: &str, bot_user: Option<&str>) -> CommandResult {
    const COMMAND: &str = "workspace install";
    let parsed = required("workspace", workspace).and_then(|workspace| {
        let token = required("bot-token", bot_token)?;
        if !token.starts_with("xoxb-") {
            return Err(StepError::invalid_argument("`bot-token` must be a bot token (xoxb-...)"));
        }
        let bot_user = bot_user.map(|user| required("bot-user", user)).transpose()?;
        Ok((WorkspaceId(workspace), SecretString::from(token), bot_user.map(SlackUserId)))
    });
    let (workspace_id, bot_token, bot_user_id) = match parsed {
        Ok(parsed) => parsed,
        Err(error) => return CommandResult::from_step(COMMAND, error),
    };

    with_database(COMMAND, |pool| async move {
        SqlInstallationRepository::new(pool)
            .upsert(WorkspaceInstallation {
                workspace_id: workspace_id.clone(),
                bot_token,
                bot_user_id,
                installed_at: Utc::now(),
            })
            .await
            .map_err(StepError::persistence)?;
        Ok(format!("installed bot credentials for workspace {workspace_id}"))
    })
}

use chrono::Utc;
use prsync_core::domain::identity::UserLink;
use prsync_core::domain::workspace::{ChannelId, SlackUserId, WorkspaceId};
use prsync_db::repositories::{SqlUserLinkRepository, UserLinkRepository};

use crate::commands::{required, with_database, CommandResult, StepError};

pub struct LinkRequest<'a> {
    pub workspace: &'a str,
    pub slack_user: &'a str,
    pub github_login: &'a str,
    pub default_channel: Option<&'a str>,
    pub unverified: bool,
    pub notifications_enabled: bool,
}

/// Links a Slack user to a GitHub login. Unverified links are stored but grant
/// no deletion rights and never feed channel routing.
pub fn link(request: LinkRequest<'_>) -> CommandResult {
    const COMMAND: &str = "user link";
    let (workspace_id, slack_user_id, github_login, default_channel_id) = match parse(&request) {
        Ok(parsed) => parsed,
        Err(error) => return CommandResult::from_step(COMMAND, error),
    };

    let verified = !request.unverified;
    let notifications_enabled = request.notifications_enabled;
    with_database(COMMAND, |pool| async move {
        let now = Utc::now();
        SqlUserLinkRepository::new(pool)
            .upsert(UserLink {
                workspace_id: workspace_id.clone(),
                slack_user_id: slack_user_id.clone(),
                github_login: github_login.clone(),
                verified,
                default_channel_id,
                notifications_enabled,
                created_at: now,
                updated_at: now,
            })
            .await
            .map_err(StepError::persistence)?;
        let verification = if verified { "verified" } else { "unverified" };
        Ok(format!(
            "linked {slack_user_id} to github user {github_login} in workspace {workspace_id} ({verification})"
        ))
    })
}

fn parse(
    request: &LinkRequest<'_>,
) -> Result<(WorkspaceId, SlackUserId, String, Option<ChannelId>), StepError> {
    let workspace_id = WorkspaceId(required("workspace", request.workspace)?);
    let slack_user_id = SlackUserId(required("slack-user", request.slack_user)?);
    let github_login =
        required("github-login", request.github_login)?.trim_start_matches('@').to_string();
    if github_login.is_empty() {
        return Err(StepError::invalid_argument("`github-login` must not be empty"));
    }
    let default_channel_id = request
        .default_channel
        .map(|channel| required("channel", channel).map(ChannelId))
        .transpose()?;
    Ok((workspace_id, slack_user_id, github_login, default_channel_id))
}

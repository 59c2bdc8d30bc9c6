use prsync_core::domain::repository::{RepoFullName, RepoRegistration};
use prsync_core::domain::workspace::{ChannelId, WorkspaceId};
use prsync_db::repositories::{RepoRegistrationRepository, SqlRepoRegistrationRepository};

use crate::commands::{required, with_database, CommandResult, StepError};

/// Registers (or re-enables) a repository for one workspace.
pub fn register(repo: &str, workspace: &str, default_channel: Option<&str>) -> CommandResult {
    const COMMAND: &str = "repo register";
    let (repo, workspace_id) = match parse_target(repo, workspace) {
        Ok(target) => target,
        Err(error) => return CommandResult::from_step(COMMAND, error),
    };
    let default_channel = match default_channel.map(|channel| required("channel", channel)) {
        None => None,
        Some(Ok(channel)) => Some(ChannelId(channel)),
        Some(Err(error)) => return CommandResult::from_step(COMMAND, error),
    };

    with_database(COMMAND, |pool| async move {
        let registrations = SqlRepoRegistrationRepository::new(pool);
        let channel_note = default_channel
            .as_ref()
            .map(|channel| format!(" with default channel {channel}"))
            .unwrap_or_default();
        registrations
            .upsert(RepoRegistration::new(repo.clone(), workspace_id.clone(), default_channel))
            .await
            .map_err(StepError::persistence)?;
        Ok(format!("registered {repo} in workspace {workspace_id}{channel_note}"))
    })
}

/// Stops notifications for a repository in one workspace without forgetting it,
/// so auto-registration will not bring it back.
pub fn disable(repo: &str, workspace: &str) -> CommandResult {
    const COMMAND: &str = "repo disable";
    let (repo, workspace_id) = match parse_target(repo, workspace) {
        Ok(target) => target,
        Err(error) => return CommandResult::from_step(COMMAND, error),
    };

    with_database(COMMAND, |pool| async move {
        let registrations = SqlRepoRegistrationRepository::new(pool);
        let updated = registrations
            .set_enabled(&repo, &workspace_id, false)
            .await
            .map_err(StepError::persistence)?;
        if !updated {
            return Err(StepError::not_found(format!(
                "{repo} is not registered in workspace {workspace_id}"
            )));
        }
        Ok(format!("disabled {repo} in workspace {workspace_id}"))
    })
}

/// Lists every registration of one workspace, enabled or not.
pub fn list(workspace: &str) -> CommandResult {
    const COMMAND: &str = "repo list";
    let workspace_id = match required("workspace", workspace) {
        Ok(workspace) => WorkspaceId(workspace),
        Err(error) => return CommandResult::from_step(COMMAND, error),
    };

    with_database(COMMAND, |pool| async move {
        let registrations = SqlRepoRegistrationRepository::new(pool)
            .list_for_workspace(&workspace_id)
            .await
            .map_err(StepError::persistence)?;
        if registrations.is_empty() {
            return Ok(format!("no repositories registered in workspace {workspace_id}"));
        }

        let lines: Vec<String> = registrations
            .iter()
            .map(|registration| {
                format!(
                    "{} ({}, default channel: {})",
                    registration.repo,
                    if registration.enabled { "enabled" } else { "disabled" },
                    registration
                        .default_channel_id
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "<unset>".to_string()),
                )
            })
            .collect();
        Ok(lines.join("\n"))
    })
}

fn parse_target(repo: &str, workspace: &str) -> Result<(RepoFullName, WorkspaceId), StepError> {
    let parsed = RepoFullName::parse(repo).ok_or_else(|| {
        StepError::invalid_argument(format!("`{repo}` is not an owner/name repository"))
    })?;
    Ok((parsed, WorkspaceId(required("workspace", workspace)?)))
}

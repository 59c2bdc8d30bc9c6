use std::sync::Arc;

use async_trait::async_trait;
use prsync_core::WorkspaceId;
use prsync_db::repositories::InstallationRepository;
use prsync_slack::{SlackApiError, TokenSource, WorkspaceCredentials};

/// Resolves per-workspace bot credentials from stored installations.
pub struct InstallationTokenSource {
    installations: Arc<dyn InstallationRepository>,
}

impl InstallationTokenSource {
    pub fn new(installations: Arc<dyn InstallationRepository>) -> Self {
        Self { installations }
    }
}

#[async_trait]
impl TokenSource for InstallationTokenSource {
    async fn credentials(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<WorkspaceCredentials, SlackApiError> {
        let installation = self
            .installations
            .find(workspace)
            .await
            .map_err(|error| SlackApiError::Credentials(error.to_string()))?
            .ok_or_else(|| SlackApiError::NotInstalled { workspace: workspace.clone() })?;

        Ok(WorkspaceCredentials {
            bot_token: installation.bot_token,
            bot_user_id: installation.bot_user_id,
        })
    }
}

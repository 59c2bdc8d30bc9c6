use secrecy::ExposeSecret;
use sqlx::Row;

use prsync_core::domain::workspace::{SlackUserId, WorkspaceId, WorkspaceInstallation};

use super::rows::{format_timestamp, parse_timestamp};
use super::{InstallationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlInstallationRepository {
    pool: DbPool,
}

impl SqlInstallationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InstallationRepository for SqlInstallationRepository {
    async fn find(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<WorkspaceInstallation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT workspace_id, bot_token, bot_user_id, installed_at
             FROM workspace_installation
             WHERE workspace_id = ?",
        )
        .bind(&workspace_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<WorkspaceInstallation, RepositoryError> {
            Ok(WorkspaceInstallation {
                workspace_id: WorkspaceId(row.try_get("workspace_id")?),
                bot_token: row.try_get::<String, _>("bot_token")?.into(),
                bot_user_id: row.try_get::<Option<String>, _>("bot_user_id")?.map(SlackUserId),
                installed_at: parse_timestamp("installed_at", row.try_get("installed_at")?)?,
            })
        })
        .transpose()
    }

    async fn upsert(&self, installation: WorkspaceInstallation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO workspace_installation (workspace_id, bot_token, bot_user_id, installed_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (workspace_id) DO UPDATE SET
                bot_token = excluded.bot_token,
                bot_user_id = excluded.bot_user_id,
                installed_at = excluded.installed_at",
        )
        .bind(&installation.workspace_id.0)
        .bind(installation.bot_token.expose_secret())
        .bind(installation.bot_user_id.as_ref().map(|user| user.0.as_str()))
        .bind(format_timestamp(&installation.installed_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

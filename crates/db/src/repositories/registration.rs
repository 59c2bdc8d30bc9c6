use sqlx::{sqlite::SqliteRow, Row};

use prsync_core::domain::repository::{RepoFullName, RepoRegistration};
use prsync_core::domain::workspace::{ChannelId, WorkspaceId};

use super::rows::{format_timestamp, parse_timestamp};
use super::{RepoRegistrationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlRepoRegistrationRepository {
    pool: DbPool,
}

impl SqlRepoRegistrationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RepoRegistrationRepository for SqlRepoRegistrationRepository {
    async fn list_enabled_for_repo(
        &self,
        repo: &RepoFullName,
    ) -> Result<Vec<RepoRegistration>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT repo, workspace_id, enabled, default_channel_id, created_at, updated_at
             FROM repo_registration
             WHERE repo = ? AND enabled = 1
             ORDER BY workspace_id ASC",
        )
        .bind(repo.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(registration_from_row).collect()
    }

    async fn list_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<RepoRegistration>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT repo, workspace_id, enabled, default_channel_id, created_at, updated_at
             FROM repo_registration
             WHERE workspace_id = ?
             ORDER BY repo ASC",
        )
        .bind(&workspace_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(registration_from_row).collect()
    }

    async fn register_if_absent(
        &self,
        registration: RepoRegistration,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO repo_registration (
                repo, workspace_id, enabled, default_channel_id, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (repo, workspace_id) DO NOTHING",
        )
        .bind(registration.repo.as_str())
        .bind(&registration.workspace_id.0)
        .bind(registration.enabled)
        .bind(registration.default_channel_id.as_ref().map(|channel| channel.0.as_str()))
        .bind(format_timestamp(&registration.created_at))
        .bind(format_timestamp(&registration.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn upsert(&self, registration: RepoRegistration) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO repo_registration (
                repo, workspace_id, enabled, default_channel_id, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (repo, workspace_id) DO UPDATE SET
                enabled = excluded.enabled,
                default_channel_id = COALESCE(excluded.default_channel_id, repo_registration.default_channel_id),
                updated_at = excluded.updated_at",
        )
        .bind(registration.repo.as_str())
        .bind(&registration.workspace_id.0)
        .bind(registration.enabled)
        .bind(registration.default_channel_id.as_ref().map(|channel| channel.0.as_str()))
        .bind(format_timestamp(&registration.created_at))
        .bind(format_timestamp(&registration.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_enabled(
        &self,
        repo: &RepoFullName,
        workspace_id: &WorkspaceId,
        enabled: bool,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE repo_registration SET enabled = ?, updated_at = ?
             WHERE repo = ? AND workspace_id = ?",
        )
        .bind(enabled)
        .bind(format_timestamp(&chrono::Utc::now()))
        .bind(repo.as_str())
        .bind(&workspace_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn registration_from_row(row: SqliteRow) -> Result<RepoRegistration, RepositoryError> {
    Ok(RepoRegistration {
        repo: RepoFullName::new(row.try_get::<String, _>("repo")?),
        workspace_id: WorkspaceId(row.try_get("workspace_id")?),
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        default_channel_id: row.try_get::<Option<String>, _>("default_channel_id")?.map(ChannelId),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

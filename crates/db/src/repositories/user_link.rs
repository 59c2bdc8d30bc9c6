use sqlx::{sqlite::SqliteRow, Row};

use prsync_core::domain::identity::UserLink;
use prsync_core::domain::workspace::{ChannelId, SlackUserId, WorkspaceId};

use super::rows::{format_timestamp, parse_timestamp};
use super::{RepositoryError, UserLinkRepository};
use crate::DbPool;

pub struct SqlUserLinkRepository {
    pool: DbPool,
}

impl SqlUserLinkRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserLinkRepository for SqlUserLinkRepository {
    async fn find_by_github_login(&self, login: &str) -> Result<Vec<UserLink>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT workspace_id, slack_user_id, github_login, verified, default_channel_id,
                    notifications_enabled, created_at, updated_at
             FROM user_link
             WHERE github_login = ? COLLATE NOCASE
             ORDER BY workspace_id ASC, slack_user_id ASC",
        )
        .bind(login.trim())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(link_from_row).collect()
    }

    async fn find_by_slack_user(
        &self,
        workspace_id: &WorkspaceId,
        slack_user_id: &SlackUserId,
    ) -> Result<Option<UserLink>, RepositoryError> {
        let row = sqlx::query(
            "SELECT workspace_id, slack_user_id, github_login, verified, default_channel_id,
                    notifications_enabled, created_at, updated_at
             FROM user_link
             WHERE workspace_id = ? AND slack_user_id = ?",
        )
        .bind(&workspace_id.0)
        .bind(&slack_user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(link_from_row).transpose()
    }

    async fn upsert(&self, link: UserLink) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_link (
                workspace_id, slack_user_id, github_login, verified, default_channel_id,
                notifications_enabled, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (workspace_id, slack_user_id) DO UPDATE SET
                github_login = excluded.github_login,
                verified = excluded.verified,
                default_channel_id = excluded.default_channel_id,
                notifications_enabled = excluded.notifications_enabled,
                updated_at = excluded.updated_at",
        )
        .bind(&link.workspace_id.0)
        .bind(&link.slack_user_id.0)
        .bind(&link.github_login)
        .bind(link.verified)
        .bind(link.default_channel_id.as_ref().map(|channel| channel.0.as_str()))
        .bind(link.notifications_enabled)
        .bind(format_timestamp(&link.created_at))
        .bind(format_timestamp(&link.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn link_from_row(row: SqliteRow) -> Result<UserLink, RepositoryError> {
    Ok(UserLink {
        workspace_id: WorkspaceId(row.try_get("workspace_id")?),
        slack_user_id: SlackUserId(row.try_get("slack_user_id")?),
        github_login: row.try_get("github_login")?,
        verified: row.try_get::<i64, _>("verified")? != 0,
        default_channel_id: row.try_get::<Option<String>, _>("default_channel_id")?.map(ChannelId),
        notifications_enabled: row.try_get::<i64, _>("notifications_enabled")? != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

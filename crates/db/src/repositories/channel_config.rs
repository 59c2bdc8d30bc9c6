use sqlx::Row;

use prsync_core::domain::workspace::{ChannelConfig, ChannelId, WorkspaceId};

use super::rows::{format_timestamp, parse_timestamp};
use super::{ChannelConfigRepository, RepositoryError};
use crate::DbPool;

pub struct SqlChannelConfigRepository {
    pool: DbPool,
}

impl SqlChannelConfigRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ChannelConfigRepository for SqlChannelConfigRepository {
    async fn find(
        &self,
        workspace_id: &WorkspaceId,
        channel_id: &ChannelId,
    ) -> Result<Option<ChannelConfig>, RepositoryError> {
        let row = sqlx::query(
            "SELECT workspace_id, channel_id, track_manual_links, updated_at
             FROM channel_config
             WHERE workspace_id = ? AND channel_id = ?",
        )
        .bind(&workspace_id.0)
        .bind(&channel_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<ChannelConfig, RepositoryError> {
            Ok(ChannelConfig {
                workspace_id: WorkspaceId(row.try_get("workspace_id")?),
                channel_id: ChannelId(row.try_get("channel_id")?),
                track_manual_links: row.try_get::<i64, _>("track_manual_links")? != 0,
                updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
            })
        })
        .transpose()
    }

    async fn upsert(&self, config: ChannelConfig) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO channel_config (workspace_id, channel_id, track_manual_links, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (workspace_id, channel_id) DO UPDATE SET
                track_manual_links = excluded.track_manual_links,
                updated_at = excluded.updated_at",
        )
        .bind(&config.workspace_id.0)
        .bind(&config.channel_id.0)
        .bind(config.track_manual_links)
        .bind(format_timestamp(&config.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

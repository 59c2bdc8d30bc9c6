use chrono::{Duration, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use prsync_core::domain::repository::RepoFullName;
use prsync_core::domain::tracked_message::{
    BotMessageReservation, MessageSource, ReservationOutcome, TrackedMessage, TrackedMessageId,
};
use prsync_core::domain::workspace::{ChannelId, MessageTs, WorkspaceId};

use super::rows::{format_timestamp, parse_timestamp, parse_u64, to_i64};
use super::{RepositoryError, TrackedMessageRepository};
use crate::DbPool;

/// Reservations older than this without a message timestamp belong to a
/// worker that died between reserving and posting, and may be taken over.
pub const DEFAULT_RESERVATION_TIMEOUT_SECS: i64 = 900;

const SELECT_COLUMNS: &str = "SELECT
        id,
        repo,
        pr_number,
        workspace_id,
        channel_id,
        message_ts,
        source,
        author_login,
        deleted_by_user,
        created_at
     FROM tracked_message";

pub struct SqlTrackedMessageRepository {
    pool: DbPool,
    reservation_timeout: Duration,
}

impl SqlTrackedMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, reservation_timeout: Duration::seconds(DEFAULT_RESERVATION_TIMEOUT_SECS) }
    }

    pub fn with_reservation_timeout(mut self, timeout: Duration) -> Self {
        self.reservation_timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl TrackedMessageRepository for SqlTrackedMessageRepository {
    async fn reserve_bot_message(
        &self,
        reservation: &BotMessageReservation,
    ) -> Result<ReservationOutcome, RepositoryError> {
        let stale_before = format_timestamp(&(Utc::now() - self.reservation_timeout));
        let row = sqlx::query(
            "INSERT INTO tracked_message (
                id,
                repo,
                pr_number,
                workspace_id,
                channel_id,
                message_ts,
                source,
                author_login,
                deleted_by_user,
                created_at
             ) VALUES (?, ?, ?, ?, ?, NULL, 'bot', ?, 0, ?)
             ON CONFLICT (repo, pr_number, channel_id, workspace_id) WHERE source = 'bot'
             DO UPDATE SET
                author_login = excluded.author_login,
                created_at = excluded.created_at
             WHERE tracked_message.message_ts IS NULL
               AND tracked_message.created_at < ?
             RETURNING id",
        )
        .bind(&reservation.id.0)
        .bind(reservation.repo.as_str())
        .bind(to_i64("pr_number", reservation.pr_number)?)
        .bind(&reservation.workspace_id.0)
        .bind(&reservation.channel_id.0)
        .bind(reservation.author_login.as_deref())
        .bind(format_timestamp(&reservation.reserved_at))
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(ReservationOutcome::Reserved(TrackedMessageId(row.try_get("id")?))),
            None => Ok(ReservationOutcome::AlreadyTracked),
        }
    }

    async fn attach_message_ts(
        &self,
        id: &TrackedMessageId,
        message_ts: &MessageTs,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE tracked_message SET message_ts = ? WHERE id = ? AND message_ts IS NULL",
        )
        .bind(&message_ts.0)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Database(sqlx::Error::RowNotFound));
        }
        Ok(())
    }

    async fn release_reservation(&self, id: &TrackedMessageId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM tracked_message WHERE id = ? AND message_ts IS NULL")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_manual(
        &self,
        message: TrackedMessage,
    ) -> Result<TrackedMessage, RepositoryError> {
        sqlx::query(
            "INSERT INTO tracked_message (
                id,
                repo,
                pr_number,
                workspace_id,
                channel_id,
                message_ts,
                source,
                author_login,
                deleted_by_user,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, 'manual', ?, 0, ?)
             ON CONFLICT (workspace_id, channel_id, message_ts, repo, pr_number)
             WHERE source = 'manual'
             DO NOTHING",
        )
        .bind(&message.id.0)
        .bind(message.repo.as_str())
        .bind(to_i64("pr_number", message.pr_number)?)
        .bind(&message.workspace_id.0)
        .bind(&message.channel_id.0)
        .bind(&message.message_ts.0)
        .bind(message.author_login.as_deref())
        .bind(format_timestamp(&message.created_at))
        .execute(&self.pool)
        .await?;

        let query = format!(
            "{SELECT_COLUMNS}
             WHERE source = 'manual'
               AND workspace_id = ? AND channel_id = ? AND message_ts = ?
               AND repo = ? AND pr_number = ?"
        );
        let row = sqlx::query(&query)
            .bind(&message.workspace_id.0)
            .bind(&message.channel_id.0)
            .bind(&message.message_ts.0)
            .bind(message.repo.as_str())
            .bind(to_i64("pr_number", message.pr_number)?)
            .fetch_one(&self.pool)
            .await?;

        message_from_row(row)
    }

    async fn find_by_id(
        &self,
        id: &TrackedMessageId,
    ) -> Result<Option<TrackedMessage>, RepositoryError> {
        let query = format!("{SELECT_COLUMNS} WHERE id = ? AND message_ts IS NOT NULL");
        let row = sqlx::query(&query).bind(&id.0).fetch_optional(&self.pool).await?;

        row.map(message_from_row).transpose()
    }

    async fn find_live_for_pr(
        &self,
        repo: &RepoFullName,
        pr_number: u64,
    ) -> Result<Vec<TrackedMessage>, RepositoryError> {
        let query = format!(
            "{SELECT_COLUMNS}
             WHERE repo = ? AND pr_number = ?
               AND message_ts IS NOT NULL
               AND deleted_by_user = 0
             ORDER BY workspace_id ASC, created_at ASC"
        );
        let rows = sqlx::query(&query)
            .bind(repo.as_str())
            .bind(to_i64("pr_number", pr_number)?)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn find_bot_message(
        &self,
        workspace_id: &WorkspaceId,
        channel_id: &ChannelId,
        message_ts: &MessageTs,
    ) -> Result<Option<TrackedMessage>, RepositoryError> {
        let query = format!(
            "{SELECT_COLUMNS}
             WHERE source = 'bot' AND workspace_id = ? AND channel_id = ? AND message_ts = ?"
        );
        let row = sqlx::query(&query)
            .bind(&workspace_id.0)
            .bind(&channel_id.0)
            .bind(&message_ts.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(message_from_row).transpose()
    }

    async fn mark_deleted_by_user(&self, id: &TrackedMessageId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE tracked_message SET deleted_by_user = 1 WHERE id = ? AND deleted_by_user = 0",
        )
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn message_from_row(row: SqliteRow) -> Result<TrackedMessage, RepositoryError> {
    let source_raw = row.try_get::<String, _>("source")?;
    let source = MessageSource::parse(&source_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message source `{source_raw}`")))?;
    let id = TrackedMessageId(row.try_get("id")?);
    let message_ts = row
        .try_get::<Option<String>, _>("message_ts")?
        .map(MessageTs)
        .ok_or_else(|| RepositoryError::Decode(format!("tracked message `{}` has no ts", id.0)))?;

    Ok(TrackedMessage {
        id,
        repo: RepoFullName::new(row.try_get::<String, _>("repo")?),
        pr_number: parse_u64("pr_number", row.try_get("pr_number")?)?,
        workspace_id: WorkspaceId(row.try_get("workspace_id")?),
        channel_id: ChannelId(row.try_get("channel_id")?),
        message_ts,
        source,
        author_login: row.try_get("author_login")?,
        deleted_by_user: row.try_get::<i64, _>("deleted_by_user")? != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

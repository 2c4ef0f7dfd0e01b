use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use super::MessageStore;
use crate::error::{HeraldError, Result};
use crate::model::{
    ClaimedMessage, LeaseId, ListOptions, Message, MessageId, MessageStatus,
    NewMessage,
};

/// PostgreSQL-backed [`MessageStore`].
///
/// Claims lock candidate rows with `FOR UPDATE SKIP LOCKED` so concurrent
/// producers, in this process or another, never hand out the same row.
#[derive(Clone)]
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresMessageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresMessageStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    recipient: String,
    content: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = HeraldError;

    fn try_from(row: MessageRow) -> Result<Self> {
        let status = row.status.parse::<MessageStatus>().map_err(|e| {
            HeraldError::Storage(format!(
                "message {} has unreadable status: {e}",
                row.id
            ))
        })?;
        Ok(Message {
            id: MessageId(row.id),
            recipient: row.recipient,
            content: row.content,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl PostgresMessageStore {
    pub async fn new(pool: PgPool) -> Result<Self> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                HeraldError::Storage(format!(
                    "message store failed Postgres health check: {e}"
                ))
            })?;
        info!("Message store connected to Postgres");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn list_by_status(
        &self,
        status: MessageStatus,
        opts: ListOptions,
    ) -> Result<Vec<Message>> {
        let opts = opts.normalized();

        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, recipient, content, status, created_at, updated_at
            FROM messages
            WHERE status = $1
            ORDER BY updated_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.as_str())
        .bind(opts.limit)
        .bind(opts.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            HeraldError::Storage(format!("list by status failed: {e}"))
        })?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn claim(
        &self,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<ClaimedMessage>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            HeraldError::Storage(format!("claim begin failed: {e}"))
        })?;

        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, recipient, content, status, created_at, updated_at
            FROM messages
            WHERE status = 'pending'
               OR (status = 'processing'
                   AND updated_at < NOW() - make_interval(secs => $1))
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(lease.as_secs_f64())
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| HeraldError::Storage(format!("claim select failed: {e}")))?;

        if rows.is_empty() {
            // rollback implicit
            drop(tx);
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let lease_id = LeaseId::new();

        // NOW() is fixed per transaction, so every row gets the same stamp
        let stamps: Vec<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            UPDATE messages
            SET status = 'processing',
                updated_at = NOW(),
                lease_id = $1
            WHERE id = ANY($2)
            RETURNING updated_at
            "#,
        )
        .bind(lease_id.0)
        .bind(&ids[..])
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| HeraldError::Storage(format!("claim update failed: {e}")))?;
        let claimed_at = stamps.first().copied().unwrap_or_else(Utc::now);

        tx.commit().await.map_err(|e| {
            HeraldError::Storage(format!("claim commit failed: {e}"))
        })?;

        debug!(count = ids.len(), lease = %lease_id, "claimed messages");

        rows.into_iter()
            .map(|row| {
                let mut message = Message::try_from(row)?;
                message.status = MessageStatus::Processing;
                message.updated_at = claimed_at;
                Ok(ClaimedMessage::new(message, lease_id))
            })
            .collect()
    }

    async fn update_status(
        &self,
        id: MessageId,
        status: MessageStatus,
    ) -> Result<()> {
        let sources: Vec<&str> = MessageStatus::sources_of(status)
            .iter()
            .map(MessageStatus::as_str)
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = $2,
                updated_at = NOW(),
                lease_id = CASE WHEN $3 THEN NULL ELSE lease_id END
            WHERE id = $1
              AND status = ANY($4)
            "#,
        )
        .bind(id.as_i64())
        .bind(status.as_str())
        .bind(status.is_terminal())
        .bind(&sources[..])
        .execute(&self.pool)
        .await
        .map_err(|e| {
            HeraldError::Storage(format!("update status of {id} failed: {e}"))
        })?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        // missing rows are a no-op; an existing row was in the wrong state
        match self.get(id).await? {
            Some(current) => {
                current.status.ensure_transition(status)?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn finalize(
        &self,
        id: MessageId,
        lease_id: LeaseId,
        status: MessageStatus,
    ) -> Result<bool> {
        MessageStatus::Processing.ensure_transition(status)?;

        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = $2,
                updated_at = NOW(),
                lease_id = NULL
            WHERE id = $1
              AND lease_id = $3
              AND status = 'processing'
            "#,
        )
        .bind(id.as_i64())
        .bind(status.as_str())
        .bind(lease_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            HeraldError::Storage(format!("finalize of {id} failed: {e}"))
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert(&self, message: NewMessage) -> Result<Message> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (recipient, content, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, recipient, content, status, created_at, updated_at
            "#,
        )
        .bind(&message.recipient)
        .bind(&message.content)
        .bind(message.status.as_str())
        .bind(message.created_at)
        .bind(message.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HeraldError::Storage(format!("insert failed: {e}")))?;

        Message::try_from(row)
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, recipient, content, status, created_at, updated_at
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HeraldError::Storage(format!("get {id} failed: {e}")))?;

        row.map(Message::try_from).transpose()
    }
}

/// Current lease stamped on a row, if any. Used by tests and tooling.
pub async fn current_lease(
    pool: &PgPool,
    id: MessageId,
) -> Result<Option<LeaseId>> {
    let lease: Option<Option<Uuid>> =
        sqlx::query_scalar("SELECT lease_id FROM messages WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                HeraldError::Storage(format!("lease lookup failed: {e}"))
            })?;
    Ok(lease.flatten().map(LeaseId))
}

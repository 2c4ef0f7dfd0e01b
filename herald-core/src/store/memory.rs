use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::MessageStore;
use crate::error::{HeraldError, Result};
use crate::model::{
    ClaimedMessage, LeaseId, ListOptions, Message, MessageId, MessageStatus,
    NewMessage,
};

#[derive(Debug, Clone)]
struct StoredRow {
    message: Message,
    lease_id: Option<LeaseId>,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    rows: BTreeMap<MessageId, StoredRow>,
}

/// Store kept in process memory.
///
/// Claims run under a single lock, which gives the same no-double-claim
/// guarantee the Postgres store gets from `SKIP LOCKED`.
#[derive(Default)]
pub struct InMemoryMessageStore {
    state: Mutex<State>,
}

impl fmt::Debug for InMemoryMessageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = self
            .state
            .try_lock()
            .map(|guard| guard.rows.len())
            .unwrap_or_default();
        f.debug_struct("InMemoryMessageStore")
            .field("rows", &rows)
            .finish()
    }
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn list_by_status(
        &self,
        status: MessageStatus,
        opts: ListOptions,
    ) -> Result<Vec<Message>> {
        let opts = opts.normalized();
        let state = self.state.lock().await;

        let mut matching: Vec<&Message> = state
            .rows
            .values()
            .map(|row| &row.message)
            .filter(|message| message.status == status)
            .collect();
        matching.sort_by(|a, b| {
            b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id))
        });

        Ok(matching
            .into_iter()
            .skip(opts.offset as usize)
            .take(opts.limit as usize)
            .cloned()
            .collect())
    }

    async fn claim(
        &self,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<ClaimedMessage>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let lease = chrono::Duration::from_std(lease).map_err(|e| {
            HeraldError::Internal(format!("lease duration out of range: {e}"))
        })?;

        let mut state = self.state.lock().await;
        let now = Utc::now();
        let cutoff = now - lease;

        let mut eligible: Vec<(chrono::DateTime<Utc>, MessageId)> = state
            .rows
            .values()
            .filter(|row| match row.message.status {
                MessageStatus::Pending => true,
                MessageStatus::Processing => row.message.updated_at < cutoff,
                _ => false,
            })
            .map(|row| (row.message.created_at, row.message.id))
            .collect();
        eligible.sort();
        eligible.truncate(limit as usize);

        let lease_id = LeaseId::new();
        let mut claimed = Vec::with_capacity(eligible.len());
        for (_, id) in eligible {
            if let Some(row) = state.rows.get_mut(&id) {
                row.message.status = MessageStatus::Processing;
                row.message.updated_at = now;
                row.lease_id = Some(lease_id);
                claimed.push(ClaimedMessage::new(row.message.clone(), lease_id));
            }
        }

        Ok(claimed)
    }

    async fn update_status(
        &self,
        id: MessageId,
        status: MessageStatus,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(row) = state.rows.get_mut(&id) else {
            return Ok(());
        };
        row.message.status.ensure_transition(status)?;

        row.message.status = status;
        row.message.updated_at = Utc::now();
        if status.is_terminal() {
            row.lease_id = None;
        }
        Ok(())
    }

    async fn finalize(
        &self,
        id: MessageId,
        lease_id: LeaseId,
        status: MessageStatus,
    ) -> Result<bool> {
        MessageStatus::Processing.ensure_transition(status)?;

        let mut state = self.state.lock().await;
        let Some(row) = state.rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.lease_id != Some(lease_id)
            || row.message.status != MessageStatus::Processing
        {
            return Ok(false);
        }

        row.message.status = status;
        row.message.updated_at = Utc::now();
        row.lease_id = None;
        Ok(true)
    }

    async fn insert(&self, message: NewMessage) -> Result<Message> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = MessageId(state.next_id);

        let stored = Message {
            id,
            recipient: message.recipient,
            content: message.content,
            status: message.status,
            created_at: message.created_at,
            updated_at: message.updated_at,
        };
        state.rows.insert(
            id,
            StoredRow {
                message: stored.clone(),
                lease_id: None,
            },
        );
        Ok(stored)
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>> {
        let state = self.state.lock().await;
        Ok(state.rows.get(&id).map(|row| row.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn claim_takes_oldest_pending_first() {
        let store = InMemoryMessageStore::new();
        let base = Utc::now() - ChronoDuration::minutes(10);
        let newer = store
            .insert(NewMessage::pending("b", "second").created_at(base + ChronoDuration::seconds(5)))
            .await
            .expect("insert");
        let older = store
            .insert(NewMessage::pending("a", "first").created_at(base))
            .await
            .expect("insert");

        let claimed = store
            .claim(1, super::super::DEFAULT_LEASE)
            .await
            .expect("claim");
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id(), older.id);
        assert_eq!(claimed[0].message.status, MessageStatus::Processing);

        let untouched = store.get(newer.id).await.expect("get").expect("row");
        assert_eq!(untouched.status, MessageStatus::Pending);
    }

    #[tokio::test]
    async fn terminal_rows_are_never_claimed() {
        let store = InMemoryMessageStore::new();
        let old = Utc::now() - ChronoDuration::hours(1);
        store
            .insert(NewMessage::pending("a", "x").with_status(MessageStatus::Sent).updated_at(old))
            .await
            .expect("insert");
        store
            .insert(NewMessage::pending("b", "y").with_status(MessageStatus::Failed).updated_at(old))
            .await
            .expect("insert");

        let claimed = store
            .claim(10, super::super::DEFAULT_LEASE)
            .await
            .expect("claim");
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn update_status_refuses_to_leave_a_terminal_state() {
        let store = InMemoryMessageStore::new();
        let row = store.insert(NewMessage::pending("r", "c")).await.expect("insert");
        let claimed = store
            .claim(1, super::super::DEFAULT_LEASE)
            .await
            .expect("claim")
            .remove(0);
        assert!(
            store
                .finalize(row.id, claimed.lease_id, MessageStatus::Sent)
                .await
                .expect("finalize")
        );

        let err = store
            .update_status(row.id, MessageStatus::Pending)
            .await
            .expect_err("sent -> pending must be refused");
        assert!(matches!(err, HeraldError::Validation(_)));
        let row = store.get(row.id).await.expect("get").expect("row");
        assert_eq!(row.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn update_status_follows_the_lifecycle() {
        let store = InMemoryMessageStore::new();
        let row = store.insert(NewMessage::pending("r", "c")).await.expect("insert");

        assert!(store.update_status(row.id, MessageStatus::Sent).await.is_err());
        store
            .update_status(row.id, MessageStatus::Processing)
            .await
            .expect("pending -> processing");
        store
            .update_status(row.id, MessageStatus::Failed)
            .await
            .expect("processing -> failed");

        let row = store.get(row.id).await.expect("get").expect("row");
        assert_eq!(row.status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn list_sent_paginates_newest_first() {
        let store = InMemoryMessageStore::new();
        let base = Utc::now() - ChronoDuration::hours(1);
        for minute in 0..5 {
            store
                .insert(
                    NewMessage::pending("r", format!("m{minute}"))
                        .with_status(MessageStatus::Sent)
                        .updated_at(base + ChronoDuration::minutes(minute)),
                )
                .await
                .expect("insert");
        }
        store.insert(NewMessage::pending("r", "p")).await.expect("insert");

        let first = store
            .list_sent(ListOptions::new(2, 0, 1))
            .await
            .expect("list");
        let contents: Vec<&str> =
            first.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3"]);

        let third = store
            .list_sent(ListOptions::new(2, 0, 3))
            .await
            .expect("list");
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].content, "m0");

        let defaults = store.list_sent(ListOptions::default()).await.expect("list");
        assert_eq!(defaults.len(), 5);
    }
}

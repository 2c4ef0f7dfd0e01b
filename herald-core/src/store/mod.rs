//! Durable message store port.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    ClaimedMessage, LeaseId, ListOptions, Message, MessageId, MessageStatus,
    NewMessage,
};

pub mod memory;
#[cfg(feature = "database")]
#[cfg_attr(docsrs, doc(cfg(feature = "database")))]
pub mod postgres;

pub use memory::InMemoryMessageStore;
#[cfg(feature = "database")]
pub use postgres::PostgresMessageStore;

/// Lease used by the reference deployment.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(5 * 60);

/// Abstracts the durable store the pipeline claims from and reports to.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Rows with `status`, most recently updated first.
    async fn list_by_status(
        &self,
        status: MessageStatus,
        opts: ListOptions,
    ) -> Result<Vec<Message>>;

    async fn list_sent(&self, opts: ListOptions) -> Result<Vec<Message>> {
        self.list_by_status(MessageStatus::Sent, opts).await
    }

    /// Atomically takes up to `limit` eligible rows, oldest first, and marks
    /// them `processing` under a fresh lease.
    ///
    /// Eligible means `pending`, or `processing` with `updated_at` older than
    /// `lease`. Rows held by a concurrent claim are skipped, not waited on.
    async fn claim(
        &self,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<ClaimedMessage>>;

    /// Status write along the lifecycle; refreshes `updated_at`. A move the
    /// lifecycle forbids, such as `sent -> pending`, is a `Validation` error
    /// and leaves the row alone. Unknown ids are a no-op.
    async fn update_status(
        &self,
        id: MessageId,
        status: MessageStatus,
    ) -> Result<()>;

    /// Status write fenced by the claim's lease. Returns `false` when the row
    /// no longer holds `lease_id`, i.e. it was re-claimed in the meantime.
    async fn finalize(
        &self,
        id: MessageId,
        lease_id: LeaseId,
        status: MessageStatus,
    ) -> Result<bool>;

    async fn insert(&self, message: NewMessage) -> Result<Message>;

    async fn get(&self, id: MessageId) -> Result<Option<Message>>;
}

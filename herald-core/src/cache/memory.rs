use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    AuditCache, AuditKeys, decode_timestamp, encode_timestamp,
    ensure_external_id,
};
use crate::error::Result;

/// [`AuditCache`] held in process memory. Values go through the same
/// encoding as the Redis adapter.
#[derive(Debug, Default)]
pub struct InMemoryAuditCache {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryAuditCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AuditCache for InMemoryAuditCache {
    async fn record_send(
        &self,
        external_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        ensure_external_id(external_id)?;
        self.entries
            .write()
            .await
            .insert(AuditKeys::message(external_id), encode_timestamp(sent_at));
        Ok(())
    }

    async fn sent_at(
        &self,
        external_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        ensure_external_id(external_id)?;
        let entries = self.entries.read().await;
        entries
            .get(&AuditKeys::message(external_id))
            .map(|raw| decode_timestamp(external_id, raw))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeraldError;
    use chrono::Duration;

    #[tokio::test]
    async fn later_write_wins() {
        let cache = InMemoryAuditCache::new();
        let first = Utc::now();
        let second = first + Duration::hours(2);

        cache.record_send("123", first).await.expect("record");
        cache.record_send("123", second).await.expect("record");

        let stored = cache.sent_at("123").await.expect("read").expect("entry");
        assert_eq!(stored.timestamp(), second.timestamp());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn missing_entry_is_none() {
        let cache = InMemoryAuditCache::new();
        assert!(cache.sent_at("nope").await.expect("read").is_none());
    }

    #[tokio::test]
    async fn empty_id_is_rejected() {
        let cache = InMemoryAuditCache::new();
        let err = cache.record_send("", Utc::now()).await.unwrap_err();
        assert!(matches!(err, HeraldError::Cache(_)));
        assert!(cache.is_empty().await);
    }
}

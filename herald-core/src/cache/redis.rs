use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::{debug, info};

use super::{
    AuditCache, AuditKeys, decode_timestamp, encode_timestamp,
    ensure_external_id,
};
use crate::error::{HeraldError, Result};

/// Redis-backed [`AuditCache`]. Entries have no TTL.
#[derive(Clone)]
pub struct RedisAuditCache {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisAuditCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisAuditCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisAuditCache {
    pub async fn new(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis audit cache");

        let client = redis::Client::open(redis_url).map_err(|e| {
            HeraldError::Cache(format!("Failed to create Redis client: {e}"))
        })?;

        let mut conn = ConnectionManager::new(client).await.map_err(|e| {
            HeraldError::Cache(format!("Failed to connect to Redis: {e}"))
        })?;

        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| HeraldError::Cache(format!("Redis PING failed: {e}")))?;

        info!("Successfully connected to Redis audit cache");

        Ok(Self { conn })
    }
}

#[async_trait]
impl AuditCache for RedisAuditCache {
    async fn record_send(
        &self,
        external_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        ensure_external_id(external_id)?;
        let key = AuditKeys::message(external_id);
        debug!("Cache SET: {}", key);

        // ConnectionManager is a cheap handle over one multiplexed connection
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&key, encode_timestamp(sent_at))
            .await
            .map_err(|e| HeraldError::Cache(format!("Redis SET failed: {e}")))?;

        Ok(())
    }

    async fn sent_at(
        &self,
        external_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        ensure_external_id(external_id)?;
        let key = AuditKeys::message(external_id);

        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| HeraldError::Cache(format!("Redis GET failed: {e}")))?;

        match raw {
            Some(raw) => {
                debug!("Cache HIT: {}", key);
                decode_timestamp(external_id, &raw).map(Some)
            }
            None => {
                debug!("Cache MISS: {}", key);
                Ok(None)
            }
        }
    }
}

//! Audit cache port: when did the downstream service accept a message.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{HeraldError, Result};

pub mod memory;
#[cfg(feature = "database")]
#[cfg_attr(docsrs, doc(cfg(feature = "database")))]
pub mod redis;

pub use memory::InMemoryAuditCache;
#[cfg(feature = "database")]
pub use self::redis::RedisAuditCache;

/// Records the time a delivery request was issued, keyed by the id the
/// downstream service handed back.
#[async_trait]
pub trait AuditCache: Send + Sync {
    /// Overwrites any earlier entry for `external_id`.
    async fn record_send(
        &self,
        external_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<()>;

    /// `None` when nothing was recorded for `external_id`.
    async fn sent_at(&self, external_id: &str)
    -> Result<Option<DateTime<Utc>>>;
}

#[derive(Debug, Clone, Copy)]
pub struct AuditKeys;

impl AuditKeys {
    pub fn message(external_id: &str) -> String {
        format!("message:{external_id}")
    }
}

pub(crate) fn ensure_external_id(external_id: &str) -> Result<()> {
    if external_id.is_empty() {
        return Err(HeraldError::Cache("message ID cannot be empty".into()));
    }
    Ok(())
}

/// Values are stored as RFC 3339 with second precision.
pub(crate) fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub(crate) fn decode_timestamp(
    external_id: &str,
    raw: &str,
) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| {
            HeraldError::Cache(format!(
                "entry for {external_id} is not an RFC 3339 timestamp: {e}"
            ))
        })
}

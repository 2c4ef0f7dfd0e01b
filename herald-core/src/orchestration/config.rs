use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::retry::RetryConfig;

/// Knobs for the claim/deliver pipeline.
///
/// Every field has a default so deployments only spell out what they change.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Claim cadence, batch size and lease duration.
    pub producer: ProducerConfig,
    /// Worker pool sizing.
    pub consumer: ConsumerConfig,
    /// Retry/backoff policy applied to every delivery.
    pub retry: RetryConfig,
    /// Capacity of the delivery topic; bounds how far claims run ahead.
    pub topic_capacity: usize,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Claim tick period. Zero is treated as one millisecond.
    pub interval_ms: u64,
    /// Upper bound on rows taken by a single claim.
    pub claim_batch_size: i64,
    /// How long a `processing` row stays owned before it can be re-claimed.
    pub lease_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 120_000,
            claim_batch_size: 2,
            lease_ms: 5 * 60 * 1_000,
        }
    }
}

impl ProducerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub worker_count: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self { worker_count: 2 }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
            retry: RetryConfig::default(),
            topic_capacity: Self::DEFAULT_TOPIC_CAPACITY,
        }
    }
}

impl PipelineConfig {
    pub const DEFAULT_TOPIC_CAPACITY: usize = 2;

    pub fn topic_capacity(&self) -> usize {
        if self.topic_capacity == 0 {
            Self::DEFAULT_TOPIC_CAPACITY
        } else {
            self.topic_capacity
        }
    }
}

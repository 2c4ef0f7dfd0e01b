use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::ProducerConfig;
use super::control::ProcessingSwitch;
use super::{MESSAGE_SENDER_TOPIC, MessageBus, Producer, Topic};
use crate::error::{HeraldError, Result};
use crate::model::{LeaseId, MessageId, MessageStatus, Outbound};
use crate::store::MessageStore;

/// What one claim tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimReport {
    pub claimed: usize,
    pub published: usize,
    /// Rows that failed envelope validation. They are finalized as `failed`.
    pub discarded: usize,
}

/// Periodically claims eligible rows and publishes them, in claim order.
#[derive(Clone)]
pub struct MessageProducer {
    store: Arc<dyn MessageStore>,
    switch: ProcessingSwitch,
    topic: String,
    interval: Duration,
    batch_size: i64,
    lease: Duration,
}

impl fmt::Debug for MessageProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageProducer")
            .field("topic", &self.topic)
            .field("interval", &self.interval)
            .field("batch_size", &self.batch_size)
            .field("lease", &self.lease)
            .field("switch", &self.switch)
            .finish()
    }
}

impl MessageProducer {
    pub fn new(
        store: Arc<dyn MessageStore>,
        switch: ProcessingSwitch,
        config: ProducerConfig,
    ) -> Self {
        Self {
            store,
            switch,
            topic: MESSAGE_SENDER_TOPIC.to_string(),
            interval: config.interval(),
            batch_size: config.claim_batch_size,
            lease: config.lease(),
        }
    }

    /// Overrides the tick period. Clamped to at least one millisecond.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// One tick: claim a batch and publish it.
    ///
    /// Publishing waits for free slots on the topic. If `shutdown` fires while
    /// waiting the rest of the batch stays `processing` until its lease runs
    /// out, and `Cancelled` is returned.
    pub async fn claim_and_publish(
        &self,
        topic: &Topic<Outbound>,
        shutdown: &CancellationToken,
    ) -> Result<ClaimReport> {
        let claimed = self.store.claim(self.batch_size, self.lease).await?;
        let mut report = ClaimReport {
            claimed: claimed.len(),
            ..ClaimReport::default()
        };
        if claimed.is_empty() {
            return Ok(report);
        }
        debug!(
            target: "herald::producer",
            topic = topic.name(),
            count = claimed.len(),
            "claimed messages"
        );

        for row in claimed {
            let message_id = row.id();
            let lease_id = row.lease_id;
            let outbound = match Outbound::try_from(row) {
                Ok(outbound) => outbound,
                Err(e) => {
                    warn!(
                        target: "herald::producer",
                        %message_id,
                        error = %e,
                        "discarding undeliverable message"
                    );
                    report.discarded += 1;
                    self.fail_undeliverable(message_id, lease_id).await;
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    return Err(HeraldError::Cancelled(format!(
                        "publish of message {message_id} interrupted"
                    )));
                }
                sent = topic.publish(outbound) => {
                    if sent.is_err() {
                        return Err(HeraldError::Internal(format!(
                            "topic {} closed", topic.name()
                        )));
                    }
                }
            }
            report.published += 1;
        }

        Ok(report)
    }

    async fn fail_undeliverable(&self, message_id: MessageId, lease_id: LeaseId) {
        match self
            .store
            .finalize(message_id, lease_id, MessageStatus::Failed)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(target: "herald::producer", %message_id, "lease lost before failing undeliverable message");
            }
            Err(e) => {
                error!(
                    target: "herald::producer",
                    %message_id,
                    error = %e,
                    "failed to mark undeliverable message failed; it will be re-claimed"
                );
            }
        }
    }
}

#[async_trait]
impl Producer for MessageProducer {
    async fn produce(
        &self,
        bus: Arc<MessageBus>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let Some(topic) = bus.get_channel(&self.topic) else {
            error!(target: "herald::producer", topic = %self.topic, "topic not registered");
            return Err(HeraldError::ChannelNotFound(self.topic.clone()));
        };

        // first tick after one full period
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            target: "herald::producer",
            topic = topic.name(),
            interval = ?self.interval,
            batch_size = self.batch_size,
            "message producer started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !self.switch.is_enabled() {
                info!(target: "herald::producer", "message processing disabled, skipping tick");
                continue;
            }

            match self.claim_and_publish(&topic, &shutdown).await {
                Ok(report) if report.claimed > 0 => {
                    info!(
                        target: "herald::producer",
                        claimed = report.claimed,
                        published = report.published,
                        discarded = report.discarded,
                        "claim tick finished"
                    );
                }
                Ok(_) => {}
                Err(HeraldError::Cancelled(reason)) => {
                    info!(target: "herald::producer", %reason, "publish abandoned on shutdown");
                    break;
                }
                Err(e) => {
                    error!(target: "herald::producer", error = %e, "claim tick failed");
                }
            }
        }

        info!(target: "herald::producer", "message producer stopped");
        Ok(())
    }
}

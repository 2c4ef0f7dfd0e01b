use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Consumer, MESSAGE_SENDER_TOPIC, MessageBus, Topic};
use crate::cache::AuditCache;
use crate::delivery::{Notifier, NotifierResponse};
use crate::error::{HeraldError, Result};
use crate::model::{MessageStatus, Outbound};
use crate::retry::{RetryConfig, RetryError, retry};
use crate::store::MessageStore;

/// Pool of delivery workers sharing one topic.
///
/// Workers compete for messages on the topic; whichever is idle takes the
/// next one. Each delivery runs under [`retry`], then the row is finalized
/// under the lease it was claimed with and the send time is recorded against
/// the receipt id.
#[derive(Clone)]
pub struct MessageConsumer {
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn Notifier>,
    cache: Arc<dyn AuditCache>,
    retry: RetryConfig,
    topic: String,
}

impl fmt::Debug for MessageConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageConsumer")
            .field("topic", &self.topic)
            .field("notifier", &self.notifier)
            .field("retry", &self.retry)
            .finish()
    }
}

/// How a single message left a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed,
    /// Shutdown interrupted delivery; the row is recovered by lease expiry.
    Abandoned,
}

impl MessageConsumer {
    pub fn new(
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn Notifier>,
        cache: Arc<dyn AuditCache>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            cache,
            retry,
            topic: MESSAGE_SENDER_TOPIC.to_string(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    async fn run_worker(
        self,
        worker: usize,
        topic: Topic<Outbound>,
        shutdown: CancellationToken,
    ) {
        debug!(target: "herald::consumer", worker, topic = topic.name(), "worker started");

        loop {
            let outbound = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = topic.recv() => match next {
                    Some(outbound) => outbound,
                    None => break,
                },
            };

            self.process(worker, outbound, &shutdown).await;
        }

        debug!(target: "herald::consumer", worker, "worker stopped");
    }

    /// Delivers one message and records the result. Never fails: every error
    /// past this point is logged and the worker moves on.
    pub async fn process(
        &self,
        worker: usize,
        outbound: Outbound,
        shutdown: &CancellationToken,
    ) -> DeliveryOutcome {
        let message_id = outbound.id();
        let requested_at = Utc::now();

        let delivery = retry(&self.retry, shutdown, || {
            self.notifier.send(outbound.recipient(), outbound.content())
        })
        .await;

        let (status, response) = match delivery {
            Ok(response) => (MessageStatus::Sent, Some(response)),
            Err(RetryError::Cancelled) => {
                info!(
                    target: "herald::consumer",
                    worker,
                    %message_id,
                    "delivery abandoned on shutdown"
                );
                return DeliveryOutcome::Abandoned;
            }
            Err(e) => {
                warn!(
                    target: "herald::consumer",
                    worker,
                    %message_id,
                    error = %e,
                    "delivery failed"
                );
                (MessageStatus::Failed, None)
            }
        };

        match self
            .store
            .finalize(message_id, outbound.lease_id(), status)
            .await
        {
            Ok(true) => {
                debug!(target: "herald::consumer", worker, %message_id, %status, "message finalized");
            }
            Ok(false) => {
                warn!(
                    target: "herald::consumer",
                    worker,
                    %message_id,
                    lease = %outbound.lease_id(),
                    %status,
                    "lease lost before finalize; leaving row to its new owner"
                );
            }
            Err(e) => {
                error!(
                    target: "herald::consumer",
                    worker,
                    %message_id,
                    error = %e,
                    "failed to update message status"
                );
            }
        }

        match response {
            Some(response) => {
                self.record_audit(worker, &outbound, response, requested_at)
                    .await;
                DeliveryOutcome::Sent
            }
            None => DeliveryOutcome::Failed,
        }
    }

    async fn record_audit(
        &self,
        worker: usize,
        outbound: &Outbound,
        response: NotifierResponse,
        requested_at: chrono::DateTime<Utc>,
    ) {
        let message_id = outbound.id();
        let Some(receipt) = response.receipt else {
            warn!(
                target: "herald::consumer",
                worker,
                %message_id,
                "delivery accepted without a receipt; audit entry skipped"
            );
            return;
        };

        if let Err(e) =
            self.cache.record_send(&receipt.message_id, requested_at).await
        {
            warn!(
                target: "herald::consumer",
                worker,
                %message_id,
                external_id = %receipt.message_id,
                error = %e,
                "failed to record audit entry"
            );
            return;
        }

        info!(
            target: "herald::consumer",
            worker,
            %message_id,
            external_id = %receipt.message_id,
            "message sent"
        );
    }
}

#[async_trait]
impl Consumer for MessageConsumer {
    async fn consume(
        &self,
        bus: Arc<MessageBus>,
        worker_count: usize,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let Some(topic) = bus.get_channel(&self.topic) else {
            error!(target: "herald::consumer", topic = %self.topic, "topic not registered");
            return Err(HeraldError::ChannelNotFound(self.topic.clone()));
        };

        let worker_count = worker_count.max(1);
        info!(
            target: "herald::consumer",
            topic = topic.name(),
            workers = worker_count,
            "message consumer started"
        );

        let handles: Vec<_> = (0..worker_count)
            .map(|worker| {
                tokio::spawn(self.clone().run_worker(
                    worker,
                    topic.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        for (worker, joined) in join_all(handles).await.into_iter().enumerate()
        {
            if let Err(e) = joined {
                error!(target: "herald::consumer", worker, error = %e, "worker panicked");
            }
        }

        info!(target: "herald::consumer", "message consumer stopped");
        Ok(())
    }
}

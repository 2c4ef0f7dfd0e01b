//! Claim, fan-out and delivery.
//!
//! A [`Scheduler`] owns one [`Bus`] of [`Outbound`] envelopes. Producers claim
//! rows from the store and publish them; consumers run a pool of workers that
//! drain the topic, deliver through the retrying notifier and record the
//! outcome. Every task shares one cancellation token and the scheduler joins
//! all of them before returning.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::Outbound;

pub mod bus;
pub mod config;
pub mod consumer;
pub mod control;
pub mod producer;
pub mod scheduler;

pub use bus::{Bus, MESSAGE_SENDER_TOPIC, Topic};
pub use config::{ConsumerConfig, PipelineConfig, ProducerConfig, RetryConfig};
pub use consumer::{DeliveryOutcome, MessageConsumer};
pub use control::{ProcessingCommand, ProcessingSwitch};
pub use producer::{ClaimReport, MessageProducer};
pub use scheduler::Scheduler;

/// Bus carrying claimed messages to delivery workers.
pub type MessageBus = Bus<Outbound>;

/// A claim loop feeding the bus.
#[async_trait]
pub trait Producer: Send + Sync + fmt::Debug {
    /// Runs until `shutdown` fires. Returns early only when the topic is
    /// missing; per-tick failures are logged and retried on the next tick.
    async fn produce(
        &self,
        bus: Arc<MessageBus>,
        shutdown: CancellationToken,
    ) -> Result<()>;
}

/// A worker pool draining the bus.
#[async_trait]
pub trait Consumer: Send + Sync + fmt::Debug {
    /// Starts `worker_count` workers and waits for all of them to stop.
    async fn consume(
        &self,
        bus: Arc<MessageBus>,
        worker_count: usize,
        shutdown: CancellationToken,
    ) -> Result<()>;
}

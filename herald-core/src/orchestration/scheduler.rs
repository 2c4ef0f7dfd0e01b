use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::config::PipelineConfig;
use super::control::ProcessingSwitch;
use super::{Consumer, MESSAGE_SENDER_TOPIC, MessageBus, Producer};
use crate::error::{HeraldError, Result};

/// Owns the bus and runs every registered producer and consumer as one unit.
///
/// The scheduler never looks at process signals. Callers hand it a stop
/// future or a cancellation token; translating SIGINT/SIGTERM into one of
/// those is the binary's job.
pub struct Scheduler {
    bus: Arc<MessageBus>,
    switch: ProcessingSwitch,
    producers: Vec<Arc<dyn Producer>>,
    consumers: Vec<Arc<dyn Consumer>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("bus", &self.bus)
            .field("switch", &self.switch)
            .field("producer_count", &self.producers.len())
            .field("consumer_count", &self.consumers.len())
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Registers the delivery topic with the default capacity.
    pub fn new() -> Self {
        Self::with_topic_capacity(PipelineConfig::DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_topic_capacity(capacity: usize) -> Self {
        let bus = Arc::new(MessageBus::new());
        bus.register_channel(MESSAGE_SENDER_TOPIC, capacity);
        Self {
            bus,
            switch: ProcessingSwitch::default(),
            producers: Vec::new(),
            consumers: Vec::new(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::with_topic_capacity(config.topic_capacity())
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        Arc::clone(&self.bus)
    }

    /// Handle to the gate every producer built from this scheduler should
    /// share.
    pub fn switch(&self) -> ProcessingSwitch {
        self.switch.clone()
    }

    /// Registers an extra topic. Replaces (and empties) an existing one.
    pub fn register_topic(&self, topic: &str, capacity: usize) {
        self.bus.register_channel(topic, capacity);
    }

    pub fn add_producer(&mut self, producer: impl Producer + 'static) {
        self.producers.push(Arc::new(producer));
    }

    pub fn add_consumer(&mut self, consumer: impl Consumer + 'static) {
        self.consumers.push(Arc::new(consumer));
    }

    /// Runs until `parent` is cancelled, then joins every task.
    pub async fn run(
        &self,
        parent: &CancellationToken,
        worker_count: usize,
    ) -> Result<()> {
        let token = parent.child_token();
        let stop = token.clone();
        self.run_with(token, stop.cancelled_owned(), worker_count)
            .await
    }

    /// Starts every producer and consumer, waits for `stop`, cancels them
    /// and joins every task. There is no join timeout: a task that ignores
    /// cancellation holds shutdown open.
    pub async fn run_until<F>(&self, stop: F, worker_count: usize) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.run_with(CancellationToken::new(), stop, worker_count)
            .await
    }

    async fn run_with<F>(
        &self,
        token: CancellationToken,
        stop: F,
        worker_count: usize,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut handles: Vec<(&'static str, JoinHandle<Result<()>>)> =
            Vec::with_capacity(self.producers.len() + self.consumers.len());

        for producer in &self.producers {
            let producer = Arc::clone(producer);
            let bus = self.bus();
            let shutdown = token.clone();
            handles.push((
                "producer",
                tokio::spawn(
                    async move { producer.produce(bus, shutdown).await },
                ),
            ));
        }

        for consumer in &self.consumers {
            let consumer = Arc::clone(consumer);
            let bus = self.bus();
            let shutdown = token.clone();
            handles.push((
                "consumer",
                tokio::spawn(async move {
                    consumer.consume(bus, worker_count, shutdown).await
                }),
            ));
        }

        info!(
            target: "herald::scheduler",
            producers = self.producers.len(),
            consumers = self.consumers.len(),
            worker_count,
            "scheduler started"
        );

        stop.await;
        info!(target: "herald::scheduler", "stop requested, cancelling tasks");
        token.cancel();

        let (kinds, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let mut panicked = 0usize;
        for (kind, joined) in kinds.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(target: "herald::scheduler", task = kind, error = %e, "task ended with error");
                }
                Err(e) => {
                    panicked += 1;
                    error!(target: "herald::scheduler", task = kind, error = %e, "task panicked");
                }
            }
        }

        info!(target: "herald::scheduler", "scheduler stopped");
        if panicked > 0 {
            return Err(HeraldError::Internal(format!(
                "{panicked} pipeline task(s) panicked"
            )));
        }
        Ok(())
    }
}

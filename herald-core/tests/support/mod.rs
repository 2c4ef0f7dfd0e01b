//! Stub notifiers and helpers shared by the pipeline tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Semaphore};

use herald_core::HeraldError;
use herald_core::cache::AuditCache;

use herald_core::delivery::{
    DeliveryError, DeliveryReceipt, Notifier, NotifierResponse,
};
use herald_core::retry::RetryConfig;

/// Millisecond backoffs so retry paths finish quickly.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        backoff_factor: 2,
    }
}

fn accepted(call: usize) -> NotifierResponse {
    NotifierResponse::accepted(
        202,
        DeliveryReceipt {
            message_id: format!("ext-{call}"),
            info: "Accepted".into(),
        },
    )
}

/// Accepts everything and remembers the receipt ids it handed out.
#[derive(Debug, Default)]
pub struct AlwaysAccept {
    calls: AtomicUsize,
    receipts: Mutex<Vec<String>>,
}

impl AlwaysAccept {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn receipts(&self) -> Vec<String> {
        self.receipts.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for AlwaysAccept {
    async fn send(
        &self,
        _recipient: &str,
        _content: &str,
    ) -> Result<NotifierResponse, DeliveryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let response = accepted(call);
        if let Some(receipt) = &response.receipt {
            self.receipts.lock().await.push(receipt.message_id.clone());
        }
        Ok(response)
    }
}

/// Fails the first `failures` calls with a transport error, then accepts.
#[derive(Debug)]
pub struct FailThenAccept {
    failures: usize,
    calls: AtomicUsize,
}

impl FailThenAccept {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for FailThenAccept {
    async fn send(
        &self,
        _recipient: &str,
        _content: &str,
    ) -> Result<NotifierResponse, DeliveryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(DeliveryError::Transport("connection reset".into()));
        }
        Ok(accepted(call))
    }
}

/// Holds every call until the test releases a permit.
#[derive(Debug)]
pub struct Gated {
    gate: Arc<Semaphore>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Gated {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for Gated {
    async fn send(
        &self,
        _recipient: &str,
        _content: &str,
    ) -> Result<NotifierResponse, DeliveryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        permit.forget();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(accepted(call))
    }
}

/// Audit cache whose writes always fail.
#[derive(Debug, Default)]
pub struct BrokenCache {
    writes: AtomicUsize,
}

impl BrokenCache {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditCache for BrokenCache {
    async fn record_send(
        &self,
        _external_id: &str,
        _sent_at: DateTime<Utc>,
    ) -> herald_core::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(HeraldError::Cache("connection refused".into()))
    }

    async fn sent_at(
        &self,
        _external_id: &str,
    ) -> herald_core::Result<Option<DateTime<Utc>>> {
        Err(HeraldError::Cache("connection refused".into()))
    }
}

/// Polls `check` until it holds or `within` elapses.
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

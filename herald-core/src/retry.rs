//! Bounded retry with capped exponential backoff.
//!
//! An attempt succeeds when the operation returns without error and its
//! response carries a 2xx status. Anything else is retried after the current
//! backoff, which then grows by `backoff_factor` up to `max_backoff_ms`. The
//! wait between attempts races the cancellation token.

use std::fmt::{self, Display};
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_factor: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 20_000,
            backoff_factor: 2,
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_backoff(),
            max: self.max_backoff(),
            factor: self.backoff_factor,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Delay sequence between attempts: `initial`, then multiplied by `factor`
/// and capped at `max`.
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    factor: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.saturating_mul(self.factor).min(self.max);
        Some(current)
    }
}

/// Responses that carry a transport status code.
pub trait StatusClassified {
    fn status_code(&self) -> u16;

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code())
    }
}

/// Errors that may clear up on their own. Non-transient errors stop the
/// retry loop immediately.
pub trait Transient {
    fn is_transient(&self) -> bool {
        true
    }
}

/// Why a single attempt did not succeed.
#[derive(Debug)]
pub enum AttemptFailure<E> {
    Transport(E),
    UnexpectedStatus(u16),
}

impl<E: Display> Display for AttemptFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Transport(err) => write!(f, "{err}"),
            AttemptFailure::UnexpectedStatus(code) => {
                write!(f, "unexpected status code: {code}")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E: Display> {
    #[error("retry cancelled")]
    Cancelled,
    #[error("permanent failure: {0}")]
    Permanent(E),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: AttemptFailure<E>,
    },
}

impl<E: Display> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }
}

/// Runs `op` until it succeeds, fails permanently, runs out of attempts, or
/// `cancel` fires while waiting between attempts.
pub async fn retry<F, Fut, R, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<R, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    R: StatusClassified,
    E: Transient + Display,
{
    let attempts = config.attempts();
    let mut backoff = config.backoff();
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let failure = match op().await {
            Ok(response) if response.is_success() => {
                if attempt > 1 {
                    debug!(target: "herald::retry", attempt, "succeeded after retrying");
                }
                return Ok(response);
            }
            Ok(response) => {
                AttemptFailure::UnexpectedStatus(response.status_code())
            }
            Err(err) if !err.is_transient() => {
                return Err(RetryError::Permanent(err));
            }
            Err(err) => AttemptFailure::Transport(err),
        };

        if attempt >= attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: failure,
            });
        }

        let delay = backoff.next().unwrap_or_else(|| config.max_backoff());
        warn!(
            target: "herald::retry",
            attempt,
            max_attempts = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "attempt failed, backing off"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

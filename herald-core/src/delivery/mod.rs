//! Delivery port: one attempt at handing a message to the downstream service.
//!
//! Retrying is not the notifier's concern. The consumer wraps [`Notifier::send`]
//! with [`crate::retry::retry`], which classifies the response by status code
//! and the error by [`Transient`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::{StatusClassified, Transient};

#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub mod http;

#[cfg(feature = "http")]
pub use http::HttpNotifier;

/// Acknowledgement returned by the downstream service on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Identifier assigned by the downstream service. Keys the audit entry.
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "message", default)]
    pub info: String,
}

/// Outcome of a single delivery attempt that reached the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierResponse {
    pub status: u16,
    pub receipt: Option<DeliveryReceipt>,
}

impl NotifierResponse {
    pub fn accepted(status: u16, receipt: DeliveryReceipt) -> Self {
        Self {
            status,
            receipt: Some(receipt),
        }
    }

    pub fn status_only(status: u16) -> Self {
        Self {
            status,
            receipt: None,
        }
    }
}

impl StatusClassified for NotifierResponse {
    fn status_code(&self) -> u16 {
        self.status
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery transport failed: {0}")]
    Transport(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The request could not be built; sending it again cannot help.
    #[error("invalid delivery request: {0}")]
    InvalidRequest(String),
}

impl Transient for DeliveryError {
    fn is_transient(&self) -> bool {
        !matches!(self, DeliveryError::InvalidRequest(_))
    }
}

#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    async fn send(
        &self,
        recipient: &str,
        content: &str,
    ) -> Result<NotifierResponse, DeliveryError>;
}

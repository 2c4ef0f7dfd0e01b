use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use super::{DeliveryError, DeliveryReceipt, Notifier, NotifierResponse};
use crate::error::{HeraldError, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct NotificationRequest<'a> {
    to: &'a str,
    content: &'a str,
}

/// Posts `{"to", "content"}` to a single webhook URL.
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl fmt::Debug for HttpNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpNotifier")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpNotifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client =
            reqwest::Client::builder().timeout(timeout).build().map_err(
                |e| {
                    HeraldError::Delivery(format!(
                        "failed to build HTTP client: {e}"
                    ))
                },
            )?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(
        &self,
        recipient: &str,
        content: &str,
    ) -> std::result::Result<NotifierResponse, DeliveryError> {
        let response = self
            .client
            .post(&self.base_url)
            .json(&NotificationRequest {
                to: recipient,
                content,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(self.timeout)
                } else if e.is_builder() {
                    DeliveryError::InvalidRequest(e.to_string())
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            debug!(status, "notification service rejected request");
            return Ok(NotifierResponse::status_only(status));
        }

        // The message is out once the service said 2xx, so an unreadable
        // body only costs the receipt.
        match response.json::<DeliveryReceipt>().await {
            Ok(receipt) => Ok(NotifierResponse::accepted(status, receipt)),
            Err(e) => {
                warn!(status, error = %e, "unreadable delivery receipt");
                Ok(NotifierResponse::status_only(status))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn posts_payload_and_reads_receipt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({
                "to": "+905551111111",
                "content": "hello"
            })))
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"Accepted","messageId":"ext-1"}"#)
            .create_async()
            .await;

        let notifier =
            HttpNotifier::new(server.url(), DEFAULT_TIMEOUT).expect("client");
        let response =
            notifier.send("+905551111111", "hello").await.expect("send");

        assert_eq!(response.status, 202);
        let receipt = response.receipt.expect("receipt");
        assert_eq!(receipt.message_id, "ext-1");
        assert_eq!(receipt.info, "Accepted");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_come_back_as_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(503)
            .create_async()
            .await;

        let notifier =
            HttpNotifier::new(server.url(), DEFAULT_TIMEOUT).expect("client");
        let response = notifier.send("r", "c").await.expect("send");

        assert_eq!(response.status, 503);
        assert!(response.receipt.is_none());
    }

    #[tokio::test]
    async fn unreachable_service_is_transient() {
        // nothing listens on the discard port
        let notifier = HttpNotifier::new("http://127.0.0.1:9", DEFAULT_TIMEOUT)
            .expect("client");
        let err = notifier.send("r", "c").await.unwrap_err();

        assert!(crate::retry::Transient::is_transient(&err));
    }
}

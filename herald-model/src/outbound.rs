use chrono::{DateTime, Utc};

use crate::error::ModelError;
use crate::ids::{LeaseId, MessageId};
use crate::lease::ClaimedMessage;

/// Typed payload carried by the delivery topic.
///
/// Only constructible from a claimed row, and only when the row has
/// something deliverable, so workers never see an unchecked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Outbound {
    id: MessageId,
    lease_id: LeaseId,
    recipient: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl Outbound {
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn lease_id(&self) -> LeaseId {
        self.lease_id
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl TryFrom<ClaimedMessage> for Outbound {
    type Error = ModelError;

    fn try_from(claimed: ClaimedMessage) -> Result<Self, Self::Error> {
        let ClaimedMessage { message, lease_id } = claimed;
        if message.recipient.trim().is_empty() {
            return Err(ModelError::InvalidMessage(format!(
                "message {} has no recipient",
                message.id
            )));
        }
        if message.content.trim().is_empty() {
            return Err(ModelError::InvalidMessage(format!(
                "message {} has no content",
                message.id
            )));
        }
        Ok(Self {
            id: message.id,
            lease_id,
            recipient: message.recipient,
            content: message.content,
            created_at: message.created_at,
        })
    }
}

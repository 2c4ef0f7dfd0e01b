use crate::ids::{LeaseId, MessageId};
use crate::message::Message;

/// A row handed out by a claim together with the lease it was stamped with.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClaimedMessage {
    pub message: Message,
    pub lease_id: LeaseId,
}

impl ClaimedMessage {
    pub fn new(message: Message, lease_id: LeaseId) -> Self {
        Self { message, lease_id }
    }

    pub fn id(&self) -> MessageId {
        self.message.id
    }
}

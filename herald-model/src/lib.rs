//! Core data model definitions shared across Herald crates.
#![allow(missing_docs)]

pub mod error;
pub mod ids;
pub mod lease;
pub mod list_options;
pub mod message;
pub mod outbound;

pub use error::{ModelError, Result as ModelResult};
pub use ids::{LeaseId, MessageId};
pub use lease::ClaimedMessage;
pub use list_options::ListOptions;
pub use message::{Message, MessageStatus, NewMessage};
pub use outbound::Outbound;

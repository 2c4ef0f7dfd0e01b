use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    UnknownStatus(String),
    InvalidTransition { from: String, to: String },
    InvalidMessage(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownStatus(raw) => {
                write!(f, "unknown message status: {raw}")
            }
            ModelError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition {from} -> {to}")
            }
            ModelError::InvalidMessage(msg) => {
                write!(f, "invalid message: {msg}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;

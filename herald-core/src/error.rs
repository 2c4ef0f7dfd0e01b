use herald_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeraldError {
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ModelError> for HeraldError {
    fn from(err: ModelError) -> Self {
        HeraldError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HeraldError>;

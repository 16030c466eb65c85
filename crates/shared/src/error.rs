use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status discriminator carried by every API response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
    Fail,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status:?}: {message}")]
pub struct ApiFailure {
    pub status: ResponseStatus,
    pub message: String,
}

impl ApiFailure {
    pub fn new(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

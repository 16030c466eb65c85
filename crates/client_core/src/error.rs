use shared::domain::TempId;
use thiserror::Error;

use crate::call::CallStatus;

/// Failures surfaced by the synchronizers. All of them are recoverable at the
/// component boundary; none is retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("failed to {operation}: {reason}")]
    FetchFailure {
        operation: &'static str,
        reason: String,
    },
    #[error("message send failed: {message}")]
    SendFailure {
        temp_id: Option<TempId>,
        message: String,
    },
    #[error("camera/microphone access denied: {0}")]
    MediaAccessDenied(String),
    #[error("call signaling failed: {0}")]
    SignalingApplyFailure(String),
    #[error("cannot {operation} while call is {status}")]
    InvalidCallTransition {
        operation: &'static str,
        status: CallStatus,
    },
    #[error("no conversation is open")]
    NoOpenConversation,
    #[error("message content must not be empty")]
    EmptyMessage,
    #[error("event channel is closed")]
    ChannelClosed,
    #[error("server error: {0}")]
    ServerError(String),
}

impl ClientError {
    pub fn fetch(operation: &'static str, source: impl std::fmt::Display) -> Self {
        Self::FetchFailure {
            operation,
            reason: source.to_string(),
        }
    }

    pub fn signaling(context: &str, source: impl std::fmt::Display) -> Self {
        Self::SignalingApplyFailure(format!("{context}: {source}"))
    }
}

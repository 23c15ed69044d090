// common/src/errors.rs
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Closed transport/operation error classification.
///
/// Classification happens exactly once, at the boundary where the failure
/// surfaces; downstream code matches on the code instead of re-inspecting
/// error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The worker link was torn down (extension reload analog); permanent
    /// until a reconnection succeeds.
    ContextInvalidated,
    /// No link to the worker has ever been established.
    RuntimeUnavailable,
    /// The runtime reported an error while handling the call.
    RuntimeError,
    /// The message could not be written to the transport.
    SendError,
    /// No reply arrived within the deadline.
    Timeout,
    /// The request itself could not be processed (malformed, invalid).
    ProcessingError,
    /// The requested key/identifier was absent from every tried location.
    NotFound,
    /// The caller's origin is not on the allow-list.
    UnauthorizedOrigin,
}

/// Bridge error carrying a classified code plus human-readable context.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("extension context invalidated: {0}")]
    ContextInvalidated(String),
    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Processing(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized origin: {0}")]
    UnauthorizedOrigin(String),
}

impl BridgeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::ContextInvalidated(_) => ErrorCode::ContextInvalidated,
            BridgeError::RuntimeUnavailable(_) => ErrorCode::RuntimeUnavailable,
            BridgeError::Runtime(_) => ErrorCode::RuntimeError,
            BridgeError::Send(_) => ErrorCode::SendError,
            BridgeError::Timeout(_) => ErrorCode::Timeout,
            BridgeError::Processing(_) => ErrorCode::ProcessingError,
            BridgeError::NotFound(_) => ErrorCode::NotFound,
            BridgeError::UnauthorizedOrigin(_) => ErrorCode::UnauthorizedOrigin,
        }
    }

    /// Whether the caller should attempt reconnection rather than surface
    /// the failure.
    pub fn is_recoverable_by_reconnect(&self) -> bool {
        matches!(
            self,
            BridgeError::ContextInvalidated(_) | BridgeError::RuntimeUnavailable(_)
        )
    }
}

/// Classify a worker-link failure at the transport boundary.
///
/// An established link that drops is the context-invalidated class
/// (extension reload analog); a link that never came up is
/// runtime-unavailable. Downstream code matches on the resulting code and
/// never re-inspects error text.
pub fn classify_link_failure(was_connected: bool, detail: impl Into<String>) -> BridgeError {
    if was_connected {
        BridgeError::ContextInvalidated(detail.into())
    } else {
        BridgeError::RuntimeUnavailable(detail.into())
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ChannelState;

/// Broad error category used for user-facing handling and retry decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncErrorCategory {
    /// Push channel failed to open or dropped.
    Connection,
    /// History fetch or clear request failed.
    Fetch,
    /// Follow create/status request failed.
    FollowAction,
    /// Invalid input or configuration.
    Config,
    /// Payload could not be encoded or decoded.
    Serialization,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload surfaced to the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct SyncError {
    /// High-level error category.
    pub category: SyncErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// HTTP status when the failure came from a REST response.
    pub status: Option<u16>,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl SyncError {
    /// Construct a new error.
    pub fn new(
        category: SyncErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            status: None,
            retry_after_ms: None,
        }
    }

    /// Build an error for a non-success HTTP response.
    pub fn from_http_status(
        category: SyncErrorCategory,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        let mut err = Self::new(category, http_status_code(status), message);
        err.status = Some(status);
        err
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: ChannelState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            SyncErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while channel is in state {current:?}"),
        )
    }

    /// Whether a caller-initiated retry may recover from this error.
    pub fn is_recoverable(&self) -> bool {
        match self.category {
            SyncErrorCategory::Connection => true,
            SyncErrorCategory::Fetch | SyncErrorCategory::FollowAction => match self.status {
                Some(status) => status == 408 || status == 429 || status >= 500,
                None => true,
            },
            SyncErrorCategory::Config
            | SyncErrorCategory::Serialization
            | SyncErrorCategory::Internal => false,
        }
    }

    /// Convert into the observable error event.
    pub fn to_event(&self) -> crate::types::SessionEvent {
        crate::types::SessionEvent::Error {
            code: self.code.clone(),
            message: self.message.clone(),
            recoverable: self.is_recoverable(),
        }
    }
}

/// Map HTTP status codes to stable error codes.
pub fn http_status_code(status: u16) -> &'static str {
    match status {
        401 | 403 => "unauthorized",
        404 => "not_found",
        408 | 429 => "rate_limited",
        400..=499 => "client_error",
        500..=599 => "server_error",
        _ => "unexpected_status",
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ClientLifecycleState;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Bad credentials or duplicate registration.
    Auth,
    /// A pull call or channel send failed.
    Network,
    /// The push channel is down.
    ChannelDisconnect,
    /// Throttled by the server.
    RateLimited,
    /// Invalid input or a command issued in the wrong state.
    Config,
    /// Serialization/deserialization failure.
    Serialization,
    /// Local persistence failure.
    Storage,
    /// Client bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    /// High-level error category.
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ChatError {
    /// Construct a new error.
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: ClientLifecycleState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChatErrorCategory::Config,
            "invalid_state_transition",
            format!("cannot run '{action}' while client is in state {current:?}"),
        )
    }

    /// A conversation command arrived with no active peer.
    pub fn no_active_conversation() -> Self {
        Self::new(
            ChatErrorCategory::Config,
            "no_active_conversation",
            "select a conversation first",
        )
    }

    /// An outbound send was attempted while the push channel is down.
    pub fn channel_disconnected() -> Self {
        Self::new(
            ChatErrorCategory::ChannelDisconnect,
            "channel_disconnected",
            "push channel is not connected",
        )
    }

    /// `RestoreSession` found nothing usable in the vault.
    pub fn no_saved_session() -> Self {
        Self::new(
            ChatErrorCategory::Auth,
            "no_saved_session",
            "no saved session found",
        )
    }

    /// Everything except internal bugs can be fixed by retrying or reselecting.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.category, ChatErrorCategory::Internal)
    }
}

/// Map HTTP status codes of pull calls to error categories.
pub fn classify_http_status(status: u16) -> ChatErrorCategory {
    match status {
        401 | 403 => ChatErrorCategory::Auth,
        408 | 429 => ChatErrorCategory::RateLimited,
        400..=499 => ChatErrorCategory::Config,
        500..=599 => ChatErrorCategory::Network,
        _ => ChatErrorCategory::Internal,
    }
}

/// Auth endpoints report bad credentials and duplicate accounts as plain 4xx.
pub fn classify_auth_status(status: u16) -> ChatErrorCategory {
    match status {
        429 => ChatErrorCategory::RateLimited,
        400..=499 => ChatErrorCategory::Auth,
        other => classify_http_status(other),
    }
}

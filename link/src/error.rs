//! Error types for chat-link.
//!
//! Transport problems are handled inside the connection task and reported
//! through [`EventHandlers`](crate::EventHandlers); history failures are
//! surfaced per attempt on the topic stream. Everything that does reach a
//! caller is a [`ChatLinkError`].

use thiserror::Error;

use crate::history::HistoryFetchError;

/// Errors returned by chat-link operations.
#[derive(Error, Debug, Clone)]
pub enum ChatLinkError {
    /// Connection lost or refused. Triggers the reconnect policy; never fatal
    /// on its own.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// A history page request failed.
    #[error("History fetch failed: {0}")]
    HistoryFetchError(#[from] HistoryFetchError),

    /// A pushed payload could not be decoded. Logged and dropped by the
    /// connection task.
    #[error("Malformed payload: {0}")]
    MalformedPayloadError(String),

    /// Two wire subscriptions were about to share one id. Not reachable
    /// through the public API.
    #[error("Duplicate subscription: {0}")]
    DuplicateSubscriptionError(String),

    /// The broker or REST backend rejected the credential.
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// Invalid client configuration (bad URL, bad topic, bad header value).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An operation did not finish in time.
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// JSON encode/decode failure on an outgoing request.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The stream or connection was closed by the caller.
    #[error("Closed: {0}")]
    Closed(String),
}

impl ChatLinkError {
    /// `true` when retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransportError(_) | Self::TimeoutError(_) => true,
            Self::HistoryFetchError(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ChatLinkError {
    fn from(err: serde_json::Error) -> Self {
        ChatLinkError::SerializationError(err.to_string())
    }
}

/// Result type for chat-link operations.
pub type Result<T> = std::result::Result<T, ChatLinkError>;

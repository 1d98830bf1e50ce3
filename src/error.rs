//! Error types shared by the stream managers, the transports and configuration.

use thiserror::Error;

/// Errors returned synchronously to callers of the stream managers.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream key (user id or project id) was empty.
    #[error("{kind} must not be empty")]
    EmptyStreamKey {
        /// What the key identifies, e.g. "user id".
        kind: &'static str,
    },
    /// A stream URL could not be built from the configured base URL.
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),
    /// The SSE transport was created outside of a tokio runtime.
    #[error("no tokio runtime available to drive the event stream")]
    NoRuntime,
    /// Building the HTTP client failed.
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// An error reported by a transport through its `onerror` handler.
///
/// These never propagate to callers directly. The notification manager logs
/// them, the progress manager turns them into `ConnectionStatus::Error` and
/// forwards them to each subscriber's `on_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request failed before a response arrived, or the body stream broke.
    #[error("network error: {0}")]
    Network(String),
    /// The server answered with a non-success status. The stream will not reconnect.
    #[error("server responded with status {0}")]
    Status(u16),
    /// The server answered with something other than `text/event-stream`.
    #[error("unexpected content type: {0}")]
    ContentType(String),
    /// The server closed the stream.
    #[error("stream ended by server")]
    Ended,
}

impl TransportError {
    /// Whether the platform transport will try to reconnect after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Ended)
    }
}

/// Errors produced while loading a `StreamConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was present but could not be parsed.
    #[error("invalid value for {var}: {reason}")]
    Invalid {
        /// The environment variable name.
        var: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

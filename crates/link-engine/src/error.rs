//! Connection engine error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors raised by connections, transports and protocols.
#[derive(Error, Debug)]
pub enum LinkError {
    /// An operation was called in the wrong connection state.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Generic transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport closed or failed before the handshake finished.
    #[error("Handshake aborted at step {step}: {reason}")]
    HandshakeAborted { step: usize, reason: String },

    /// The remote side explicitly rejected a handshake step.
    #[error("Handshake step {step} rejected: {reason}")]
    HandshakeRejected { step: usize, reason: String },

    /// A handshake step was not verified within the configured timeout.
    #[error("Handshake step {step} timed out")]
    HandshakeTimeout { step: usize },

    /// Protocol parsing/encoding errors.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The requested poll interval is below the allowed floor.
    #[error("Poll interval {requested_ms} ms is below the minimum of {minimum_ms} ms")]
    PollIntervalTooShort { requested_ms: u64, minimum_ms: u64 },

    /// The HTTP method cannot be used for polling.
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded retry gave up.
    #[error("Gave up after {attempts} attempt(s): {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<LinkError>,
    },
}

impl LinkError {
    /// Create a precondition error.
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether trying again could help. Refusals and misuse are final.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Precondition(_)
                | Self::HandshakeRejected { .. }
                | Self::PollIntervalTooShort { .. }
                | Self::UnsupportedMethod(_)
                | Self::Url(_)
                | Self::RetryExhausted { .. }
        )
    }
}

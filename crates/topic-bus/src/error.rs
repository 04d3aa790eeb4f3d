//! Bus error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors raised by the topic bus.
#[derive(Error, Debug)]
pub enum BusError {
    /// An operation was called in the wrong lifecycle state
    /// (e.g. `send` before `connect`, `connect` twice).
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// A topic segment is empty or contains the separator.
    #[error("Invalid topic segment {segment:?}: {reason}")]
    InvalidSegment { segment: String, reason: &'static str },

    /// A topic string could not be parsed.
    #[error("Invalid topic {0:?}")]
    InvalidTopic(String),

    /// A framing received the wrong number of payload frames.
    #[error("Expected {expected} payload frame(s), got {actual}")]
    FrameCount { expected: usize, actual: usize },

    /// A payload frame could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A payload could not be encoded.
    #[error("Encode error: {0}")]
    Encode(String),

    /// A wire frame exceeded the configured maximum size.
    #[error("Frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO errors from the underlying socket.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The bus connection is gone.
    #[error("Bus closed")]
    Closed,
}

impl BusError {
    /// Create a precondition error.
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Whether this error means the peer went away rather than something
    /// being wrong with the data.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

//! Transports a [`Connection`](crate::Connection) can run over.
//!
//! A transport only moves raw payloads. Parsing, serialization and the
//! handshake belong to the protocol and the engine.

pub mod memory;
pub mod poll;
pub mod websocket;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;

pub use memory::{MemoryPeer, MemoryTransport};
pub use poll::{
    BodySerializer, FormBody, HttpMethod, JsonBody, MIN_POLL_INTERVAL, PollBody, PollConfig,
    PollRequest, PollTransport, default_client,
};
pub use websocket::WebSocketTransport;

/// An unparsed payload as it came off (or goes onto) the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawMessage {
    Text(String),
    Binary(Bytes),
}

impl RawMessage {
    /// The payload as text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(data) => std::str::from_utf8(data).ok(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }
}

impl From<String> for RawMessage {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RawMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Inbound half of an open transport. Ends when the transport closes; an
/// `Err` item means the transport failed.
pub type TransportStream = BoxStream<'static, Result<RawMessage>>;

/// Outbound half of an open transport.
#[async_trait]
pub trait TransportSink: Send {
    /// Write one message. Resolves once the write completed.
    async fn send(&mut self, message: RawMessage) -> Result<()>;

    /// Close the transport.
    async fn close(&mut self) -> Result<()>;
}

/// Something that can be opened into a sink/stream pair.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn open(&self) -> Result<(Box<dyn TransportSink>, TransportStream)>;
}

//! The capability a protocol plugs into a [`Connection`](crate::Connection).

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::Result;
use crate::handshake::HandshakeStep;
use crate::transport::RawMessage;

/// Protocol-specific behaviour of a connection.
///
/// The engine owns the socket, the reader and the handshake sequencing. A
/// protocol only says what to send, how to parse and how to serialize.
pub trait LinkProtocol: Send + Sync + 'static {
    /// Messages the caller sends.
    type Outbound: Send + Sync + 'static;
    /// Messages parsed from the transport.
    type Inbound: Send + Sync + 'static;

    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Steps run in order after every (re)connect. Called once per connect
    /// so steps can carry fresh state such as nonces.
    fn handshake_steps(&self) -> Vec<HandshakeStep<Self::Outbound, Self::Inbound>>;

    /// Parse one transport payload. A payload may carry several messages
    /// (IRC batches lines) or none worth surfacing.
    fn parse_message(&self, raw: &RawMessage) -> Result<Vec<Self::Inbound>>;

    fn serialize_message(&self, message: &Self::Outbound) -> Result<RawMessage>;

    /// Automatic reply to an inbound message, e.g. `PONG` for `PING`.
    fn reply_to(&self, _message: &Self::Inbound) -> Option<Self::Outbound> {
        None
    }

    /// Keepalive sent on a fixed interval while the connection is open.
    fn heartbeat(&self) -> Option<(Duration, Self::Outbound)> {
        None
    }
}

/// One parsed inbound message together with its raw payload.
#[derive(Debug, Clone)]
pub struct InboundMessage<T> {
    pub raw: RawMessage,
    pub parsed: T,
    pub received_at: DateTime<Utc>,
}

impl<T> InboundMessage<T> {
    pub fn new(raw: RawMessage, parsed: T) -> Self {
        Self {
            raw,
            parsed,
            received_at: Utc::now(),
        }
    }
}

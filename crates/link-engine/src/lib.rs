//! Link-engine: duplex connections with ordered handshake verification.
//!
//! A [`Connection`] owns the connection lifecycle for any
//! [`LinkProtocol`] over any [`Transport`]:
//!
//! - [`WebSocketTransport`] - a persistent socket
//! - [`PollTransport`] - an HTTP endpoint polled on a fixed interval
//! - [`MemoryTransport`] - an in-process pair
//!
//! Protocols describe their handshake as a list of [`HandshakeStep`]s.
//! Each step's commands are written only after the previous step was
//! verified, and each step only considers messages that arrived after it
//! started.
//!
//! Shipped protocols live in [`protocols`]: Twitch IRC chat, Twitch PubSub
//! and plain JSON polling.

pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod protocols;
pub mod retry;
pub mod transport;

pub use config::LinkConfig;
pub use connection::{Connection, ConnectionState, Inbound};
pub use error::{LinkError, Result};
pub use handshake::{HandshakeStep, Verdict};
pub use protocol::{InboundMessage, LinkProtocol};
pub use retry::RetryPolicy;
pub use transport::websocket::install_rustls_provider;
pub use transport::{
    MIN_POLL_INTERVAL, MemoryPeer, MemoryTransport, PollConfig, PollRequest, PollTransport,
    RawMessage, Transport, TransportSink, TransportStream, WebSocketTransport,
};

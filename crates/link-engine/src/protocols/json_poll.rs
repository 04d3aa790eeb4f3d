//! JSON documents fetched by a [`PollTransport`](crate::transport::PollTransport).

use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use crate::error::{LinkError, Result};
use crate::handshake::HandshakeStep;
use crate::protocol::LinkProtocol;
use crate::transport::RawMessage;

/// Asks a polled transport for an immediate out-of-band poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollNow;

/// Parses every poll response as one JSON document of type `T`.
pub struct JsonPollProtocol<T = serde_json::Value> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonPollProtocol<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> LinkProtocol for JsonPollProtocol<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    type Outbound = PollNow;
    type Inbound = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn handshake_steps(&self) -> Vec<HandshakeStep<PollNow, T>> {
        Vec::new()
    }

    fn parse_message(&self, raw: &RawMessage) -> Result<Vec<T>> {
        let document = serde_json::from_slice(raw.as_bytes())
            .map_err(|e| LinkError::protocol(format!("{} response is not valid JSON: {e}", self.name)))?;
        Ok(vec![document])
    }

    fn serialize_message(&self, _message: &PollNow) -> Result<RawMessage> {
        Ok(RawMessage::Text(String::new()))
    }
}

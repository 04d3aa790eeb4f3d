//! Twitch PubSub: JSON frames over websocket.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LinkError, Result};
use crate::handshake::{HandshakeStep, Verdict};
use crate::protocol::LinkProtocol;
use crate::transport::{RawMessage, WebSocketTransport};

pub const TWITCH_PUBSUB_URL: &str = "wss://pubsub-edge.twitch.tv";

/// The server drops clients that stay silent for five minutes.
pub const PING_INTERVAL: Duration = Duration::from_secs(4 * 60);

/// Every frame type exchanged with PubSub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PubSubFrame {
    Ping,
    Pong,
    Listen {
        nonce: String,
        data: ListenData,
    },
    Unlisten {
        nonce: String,
        data: ListenData,
    },
    Response {
        #[serde(default)]
        nonce: Option<String>,
        #[serde(default)]
        error: String,
    },
    Message {
        data: TopicPayload,
    },
    Reconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenData {
    pub topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// A `MESSAGE` frame's body. `message` is itself a JSON document encoded
/// as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPayload {
    pub topic: String,
    pub message: String,
}

impl TopicPayload {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.message)?)
    }
}

/// PubSub subscription to a fixed set of topics.
#[derive(Debug, Clone)]
pub struct PubSubProtocol {
    topics: Vec<String>,
    auth_token: Option<String>,
}

impl PubSubProtocol {
    pub fn new<S: Into<String>>(topics: impl IntoIterator<Item = S>) -> Self {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn transport() -> WebSocketTransport {
        WebSocketTransport::new(TWITCH_PUBSUB_URL)
    }
}

impl LinkProtocol for PubSubProtocol {
    type Outbound = PubSubFrame;
    type Inbound = PubSubFrame;

    fn name(&self) -> &str {
        "pubsub"
    }

    fn handshake_steps(&self) -> Vec<HandshakeStep<PubSubFrame, PubSubFrame>> {
        let liveness = HandshakeStep::expect(vec![PubSubFrame::Ping], |frame: &PubSubFrame| {
            matches!(frame, PubSubFrame::Pong)
        });

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let listen = PubSubFrame::Listen {
            nonce: nonce.clone(),
            data: ListenData {
                topics: self.topics.clone(),
                auth_token: self.auth_token.clone(),
            },
        };
        let subscribed = HandshakeStep::with_verdict(vec![listen], move |frame: &PubSubFrame| {
            match frame {
                PubSubFrame::Response {
                    nonce: Some(echoed),
                    error,
                } if *echoed == nonce => {
                    if error.is_empty() {
                        Verdict::Accepted
                    } else {
                        Verdict::Rejected(error.clone())
                    }
                }
                _ => Verdict::Pending,
            }
        });

        vec![liveness, subscribed]
    }

    fn parse_message(&self, raw: &RawMessage) -> Result<Vec<PubSubFrame>> {
        let text = raw
            .as_text()
            .ok_or_else(|| LinkError::protocol("PubSub payload is not UTF-8"))?;
        Ok(vec![serde_json::from_str(text)?])
    }

    fn serialize_message(&self, message: &PubSubFrame) -> Result<RawMessage> {
        Ok(RawMessage::Text(serde_json::to_string(message)?))
    }

    fn heartbeat(&self) -> Option<(Duration, PubSubFrame)> {
        Some((PING_INTERVAL, PubSubFrame::Ping))
    }
}

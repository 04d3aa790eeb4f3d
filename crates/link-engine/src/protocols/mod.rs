//! Protocol capabilities shipped with the engine.

pub mod irc;
pub mod json_poll;
pub mod pubsub;

pub use irc::{ChatMessage, IrcMessage, IrcProtocol};
pub use json_poll::{JsonPollProtocol, PollNow};
pub use pubsub::{PubSubFrame, PubSubProtocol, TopicPayload};

//! Topic-bus: topic-addressed publish/subscribe across processes.
//!
//! ## Core Types
//!
//! - [`Topic`] - Colon-joined composite key (`<event-kind>[:<scope>...]`)
//! - [`TopicFilter`] - Segment-intersection subscription filter
//! - [`TopicMessage`] - A topic plus ordered payload frames
//!
//! ## Transport
//!
//! - [`Broker`] - The distribution hub every peer connects to
//! - [`Publisher`] - Sends `(topic, frames)` messages
//! - [`Subscriber`] - Receives, filters and fans out messages
//! - [`BusCodec`] - Multi-frame wire codec
//!
//! ## Typed wrappers
//!
//! - [`TopicPublisher`] / [`TopicsSubscriber`] bound to one event kind and
//!   one [`Framing`] ([`SingleJson`], [`JsonArray`], [`RawFrames`])
//!
//! Delivery is at-most-once and best effort. A message published while no
//! subscriber is listening is dropped.

pub mod broker;
pub mod codec;
pub mod config;
pub mod error;
pub mod framing;
pub mod message;
pub mod publisher;
pub mod subscriber;
pub mod topic;
pub mod typed;

pub use broker::Broker;
pub use codec::{BusCodec, Packet};
pub use config::BusConfig;
pub use error::{BusError, Result};
pub use framing::{Framing, JsonArray, RawFrames, SingleJson};
pub use message::TopicMessage;
pub use publisher::Publisher;
pub use subscriber::Subscriber;
pub use topic::{SEPARATOR, Topic, TopicFilter, split_topic};
pub use typed::{TopicEvent, TopicPublisher, TopicsSubscriber};

//! Typed publishers and subscribers bound to one event kind and one
//! payload framing.

use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::BusConfig;
use crate::error::Result;
use crate::framing::Framing;
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;
use crate::topic::Topic;

/// A decoded event together with the topic it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicEvent<T> {
    pub topic: Topic,
    pub item: T,
}

/// Publishes items of one event kind.
///
/// Several typed publishers may share one [`Publisher`]; the underlying
/// socket serializes their writes.
pub struct TopicPublisher<F: Framing> {
    publisher: Arc<Publisher>,
    kind: String,
    framing: F,
}

impl<F: Framing> TopicPublisher<F> {
    pub fn new(publisher: Arc<Publisher>, kind: impl Into<String>, framing: F) -> Self {
        Self {
            publisher,
            kind: kind.into(),
            framing,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Publish `item` on `<kind>[:<scope>...]`.
    pub async fn publish<S: AsRef<str>>(&self, scope: &[S], item: &F::Item) -> Result<()> {
        let topic = Topic::with_scope(&self.kind, scope)?;
        let frames = self.framing.encode(item)?;
        self.publisher.send(&topic, frames).await
    }
}

/// Receives items of one event kind carrying a required set of scope
/// segments.
pub struct TopicsSubscriber<F: Framing> {
    subscriber: Subscriber,
    framing: Arc<F>,
}

impl<F: Framing> TopicsSubscriber<F> {
    pub fn new<S: AsRef<str>>(config: BusConfig, kind: &str, scope: &[S], framing: F) -> Result<Self> {
        Ok(Self {
            subscriber: Subscriber::for_kind(config, kind, scope)?,
            framing: Arc::new(framing),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.subscriber = self.subscriber.with_cancellation(token);
        self
    }

    pub async fn connect(&self) -> Result<()> {
        self.subscriber.connect().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.subscriber.disconnect().await
    }

    /// Decoded events. A message that fails to decode shows up as an `Err`
    /// item; the stream itself keeps going.
    pub fn stream(&self) -> Result<BoxStream<'static, Result<TopicEvent<F::Item>>>> {
        let framing = self.framing.clone();
        let stream = self.subscriber.stream()?.map(move |message| {
            let item = framing.decode(&message.frames)?;
            Ok(TopicEvent {
                topic: message.topic,
                item,
            })
        });
        Ok(stream.boxed())
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }
}

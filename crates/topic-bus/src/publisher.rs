//! Publishing side of the bus.

use bytes::Bytes;
use futures::SinkExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, trace, warn};

use crate::codec::{BusCodec, Packet};
use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::message::TopicMessage;
use crate::topic::Topic;

type Sink = FramedWrite<TcpStream, BusCodec>;

/// Sends `(topic, frames)` messages to the distribution hub.
///
/// Delivery is best effort: a message nobody subscribed to is dropped by
/// the hub and `send` still succeeds.
pub struct Publisher {
    config: BusConfig,
    /// Held across each write so concurrent sends never interleave.
    sink: Mutex<Option<Sink>>,
}

impl Publisher {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            sink: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub async fn is_connected(&self) -> bool {
        self.sink.lock().await.is_some()
    }

    /// Open the outbound socket. Fails if already connected.
    pub async fn connect(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        if sink.is_some() {
            return Err(BusError::precondition("publisher is already connected"));
        }
        let stream = TcpStream::connect(&self.config.endpoint).await?;
        stream.set_nodelay(true)?;
        *sink = Some(FramedWrite::new(
            stream,
            BusCodec::new(self.config.max_frame_size),
        ));
        info!(endpoint = %self.config.endpoint, "Publisher connected");
        Ok(())
    }

    /// Close the socket, flushing pending output according to the linger
    /// setting. Fails if not connected.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(sink) = self.sink.lock().await.take() else {
            return Err(BusError::precondition("publisher is not connected"));
        };

        match close_with_linger(sink, self.config.linger).await {
            Ok(Linger::Flushed) => {}
            Ok(Linger::Dropped) => debug!("Publisher closed without flushing"),
            Ok(Linger::Elapsed) => {
                warn!(linger = ?self.config.linger, "Linger elapsed, pending output dropped");
            }
            Err(e) => warn!(error = %e, "Error while flushing publisher socket"),
        }
        info!(endpoint = %self.config.endpoint, "Publisher disconnected");
        Ok(())
    }

    /// Write `[topic, ...frames]` as one message. Fails if not connected.
    pub async fn send(&self, topic: &Topic, frames: Vec<Bytes>) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(BusError::precondition("publisher is not connected"));
        };
        trace!(topic = %topic, frames = frames.len(), "Publishing");
        sink.send(Packet::Publish(TopicMessage::new(topic.clone(), frames)))
            .await
    }

    /// Parse `topic` and send.
    pub async fn send_str(&self, topic: &str, frames: Vec<Bytes>) -> Result<()> {
        let topic = Topic::parse(topic)?;
        self.send(&topic, frames).await
    }
}

/// How a lingering close ended.
#[derive(Debug, PartialEq, Eq)]
enum Linger {
    Flushed,
    /// Zero linger: pending output discarded on purpose.
    Dropped,
    Elapsed,
}

/// Close `sink`, flushing for at most `linger` (`None` waits without bound).
async fn close_with_linger<S>(mut sink: S, linger: Option<Duration>) -> Result<Linger>
where
    S: futures::Sink<Packet, Error = BusError> + Unpin,
{
    match linger {
        Some(linger) if linger == Duration::ZERO => Ok(Linger::Dropped),
        Some(linger) => match tokio::time::timeout(linger, sink.close()).await {
            Ok(closed) => closed.map(|()| Linger::Flushed),
            Err(_) => Ok(Linger::Elapsed),
        },
        None => sink.close().await.map(|()| Linger::Flushed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts writes; closing either fails or never completes.
    struct StuckSink {
        fail_close: bool,
    }

    impl futures::Sink<Packet> for StuckSink {
        type Error = BusError;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, _: Packet) -> Result<()> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<()>> {
            if self.fail_close {
                Poll::Ready(Err(BusError::Closed))
            } else {
                Poll::Pending
            }
        }
    }

    #[tokio::test]
    async fn test_close_error_within_linger_is_reported() {
        let sink = StuckSink { fail_close: true };
        let result = close_with_linger(sink, Some(Duration::from_secs(1))).await;
        assert!(matches!(result, Err(BusError::Closed)));

        let sink = StuckSink { fail_close: true };
        assert!(matches!(close_with_linger(sink, None).await, Err(BusError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_linger_bounds_the_flush() {
        let sink = StuckSink { fail_close: false };
        let result = close_with_linger(sink, Some(Duration::from_secs(1))).await;
        assert_eq!(result.unwrap(), Linger::Elapsed);

        let sink = StuckSink { fail_close: false };
        let result = close_with_linger(sink, Some(Duration::ZERO)).await;
        assert_eq!(result.unwrap(), Linger::Dropped);
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let publisher = Publisher::new(BusConfig::default());
        let err = publisher
            .send_str("cheer", vec![Bytes::from_static(b"{}")])
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_fails() {
        let publisher = Publisher::new(BusConfig::default());
        let err = publisher.disconnect().await.unwrap_err();
        assert!(matches!(err, BusError::Precondition(_)));
        assert!(!publisher.is_connected().await);
    }
}

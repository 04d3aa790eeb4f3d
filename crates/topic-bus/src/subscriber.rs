//! Subscribing side of the bus.

use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{BusCodec, Packet};
use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::message::TopicMessage;
use crate::topic::TopicFilter;

/// Turn a broadcast receiver into a stream that ends when the sender goes
/// away. Lagging listeners skip ahead instead of failing.
pub(crate) fn fan_out<T>(rx: broadcast::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
{
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Bus listener lagged, messages dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

/// Outgoing half of the hub connection plus the hub's unsubscribe
/// acknowledgements, which the receive loop forwards.
struct Control {
    writer: FramedWrite<OwnedWriteHalf, BusCodec>,
    unsubscribed: mpsc::UnboundedReceiver<String>,
}

struct Active {
    cancel: CancellationToken,
    /// Kept only to mint new receivers; never read.
    template: broadcast::Receiver<TopicMessage>,
    control: Arc<tokio::sync::Mutex<Control>>,
    task: JoinHandle<Result<()>>,
}

/// Receives messages from the distribution hub.
///
/// Filtering happens twice: the hub only forwards topics starting with one
/// of `prefixes`, then the subscriber keeps messages whose topic contains
/// every segment of `filter`.
pub struct Subscriber {
    config: BusConfig,
    prefixes: Vec<String>,
    filter: TopicFilter,
    parent: Option<CancellationToken>,
    active: Mutex<Option<Active>>,
}

impl Subscriber {
    pub fn new(config: BusConfig, prefixes: Vec<String>, filter: TopicFilter) -> Self {
        Self {
            config,
            prefixes,
            filter,
            parent: None,
            active: Mutex::new(None),
        }
    }

    /// Subscribe to everything carrying the required segments, with the
    /// first one used as the hub-side prefix.
    pub fn for_kind<S: AsRef<str>>(config: BusConfig, kind: &str, scope: &[S]) -> Result<Self> {
        let filter = TopicFilter::for_kind(kind, scope)?;
        Ok(Self::new(config, vec![kind.to_string()], filter))
    }

    /// Stop the receive loop when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.parent = Some(token);
        self
    }

    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    pub fn is_connected(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Connect, register prefixes and start the receive loop. Resolves once
    /// the hub confirmed every prefix, so anything published afterwards is
    /// routed here.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Err(BusError::precondition("subscriber is already connected"));
        }

        let stream = TcpStream::connect(&self.config.endpoint).await?;
        stream.set_nodelay(true)?;
        let codec = BusCodec::new(self.config.max_frame_size);
        let (read_half, write_half) = stream.into_split();
        let mut writer = FramedWrite::new(write_half, codec);
        let mut reader = FramedRead::new(read_half, codec);

        let prefixes = if self.prefixes.is_empty() {
            vec![String::new()]
        } else {
            self.prefixes.clone()
        };
        let mut pending = prefixes.len();
        for prefix in prefixes {
            writer.send(Packet::Subscribe(prefix)).await?;
        }
        while pending > 0 {
            match reader.next().await {
                Some(Ok(Packet::Subscribed(prefix))) => {
                    trace!(prefix = %prefix, "Hub confirmed subscription");
                    pending -= 1;
                }
                // Routed before any stream could exist.
                Some(Ok(Packet::Publish(_))) => {}
                Some(Ok(other)) => warn!(packet = ?other, "Unexpected packet from hub"),
                Some(Err(e)) => return Err(e),
                None => return Err(BusError::Closed),
            }
        }

        let (tx, template) = broadcast::channel(self.config.channel_capacity.max(1));
        let cancel = match &self.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let (acks, unsubscribed) = mpsc::unbounded_channel();
        let filter = self.filter.clone();
        let task = tokio::spawn(receive_loop(reader, filter, tx, acks, cancel.clone()));
        let control = Arc::new(tokio::sync::Mutex::new(Control {
            writer,
            unsubscribed,
        }));

        let mut active = self.active.lock();
        if active.is_some() {
            cancel.cancel();
            return Err(BusError::precondition("subscriber is already connected"));
        }
        *active = Some(Active {
            cancel,
            template,
            control,
            task,
        });
        info!(endpoint = %self.config.endpoint, prefixes = ?self.prefixes, "Subscriber connected");
        Ok(())
    }

    /// A fan-out stream of matching messages. Every stream obtained from
    /// the same subscriber sees every message in the same order; all of
    /// them end when the connection goes away.
    pub fn stream(&self) -> Result<BoxStream<'static, TopicMessage>> {
        let active = self.active.lock();
        let Some(active) = active.as_ref() else {
            return Err(BusError::precondition("subscriber is not connected"));
        };
        Ok(fan_out(active.template.resubscribe()))
    }

    /// Ask the hub to stop routing topics under `prefix` here. Resolves
    /// once the hub confirmed it; removing a prefix that was never
    /// registered is a no-op on the hub.
    pub async fn unsubscribe(&self, prefix: &str) -> Result<()> {
        let control = self
            .active
            .lock()
            .as_ref()
            .map(|active| active.control.clone())
            .ok_or_else(|| BusError::precondition("subscriber is not connected"))?;

        let mut control = control.lock().await;
        control
            .writer
            .send(Packet::Unsubscribe(prefix.to_string()))
            .await?;
        match control.unsubscribed.recv().await {
            Some(confirmed) => {
                debug!(prefix = %confirmed, "Hub confirmed unsubscribe");
                Ok(())
            }
            None => Err(BusError::Closed),
        }
    }

    /// Stop the receive loop and close the socket. Returns the loop's
    /// fatal error, if it had one.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(active) = self.active.lock().take() else {
            return Err(BusError::precondition("subscriber is not connected"));
        };
        active.cancel.cancel();
        drop(active.template);
        let outcome = match active.task.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Subscriber receive loop panicked");
                Err(BusError::Closed)
            }
        };
        info!(endpoint = %self.config.endpoint, "Subscriber disconnected");
        outcome
    }
}

async fn receive_loop(
    mut reader: FramedRead<OwnedReadHalf, BusCodec>,
    filter: TopicFilter,
    tx: broadcast::Sender<TopicMessage>,
    unsubscribed: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            packet = reader.next() => packet,
        };

        match packet {
            Some(Ok(Packet::Publish(message))) => {
                if filter.matches(&message.topic) {
                    trace!(topic = %message.topic, "Delivering message");
                    // No listeners is fine; the message is simply dropped.
                    let _ = tx.send(message);
                } else {
                    trace!(topic = %message.topic, "Filtered out");
                }
            }
            Some(Ok(Packet::Unsubscribed(prefix))) => {
                let _ = unsubscribed.send(prefix);
            }
            Some(Ok(other)) => {
                warn!(packet = ?other, "Unexpected packet from hub");
            }
            Some(Err(e)) if e.is_disconnect() => {
                debug!(error = %e, "Bus socket closed");
                return Ok(());
            }
            Some(Err(e)) => {
                error!(error = %e, "Bus receive loop failed");
                return Err(e);
            }
            None => {
                debug!("Bus hub closed the connection");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_ends_when_sender_dropped() {
        let (tx, rx) = broadcast::channel(4);
        let mut stream = fan_out(rx);
        tx.send(1u32).unwrap();
        tx.send(2u32).unwrap();
        drop(tx);

        assert_eq!(stream.next().await, Some(1));
        assert_eq!(stream.next().await, Some(2));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_fan_out_skips_lagged_items() {
        let (tx, rx) = broadcast::channel(2);
        let mut stream = fan_out(rx);
        for i in 0..5u32 {
            tx.send(i).unwrap();
        }
        drop(tx);

        assert_eq!(stream.next().await, Some(3));
        assert_eq!(stream.next().await, Some(4));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_stream_requires_connection() {
        let subscriber = Subscriber::new(BusConfig::default(), vec![], TopicFilter::all());
        assert!(matches!(
            subscriber.stream().err(),
            Some(BusError::Precondition(_))
        ));
        assert!(matches!(
            subscriber.disconnect().await,
            Err(BusError::Precondition(_))
        ));
    }
}

//! In-process transport.
//!
//! Every `open()` creates a fresh channel pair and hands the far end out as
//! a [`MemoryPeer`], which plays the remote side: it sees what the engine
//! wrote and injects what the engine reads.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{RawMessage, Transport, TransportSink, TransportStream};
use crate::error::{LinkError, Result};

/// Remote side of one opened memory transport.
pub struct MemoryPeer {
    written: mpsc::UnboundedReceiver<RawMessage>,
    inject: Option<mpsc::UnboundedSender<Result<RawMessage>>>,
}

impl MemoryPeer {
    /// Next message written by the engine, or `None` once the sink closed.
    pub async fn recv(&mut self) -> Option<RawMessage> {
        self.written.recv().await
    }

    /// A message already written, without waiting.
    pub fn try_recv(&mut self) -> Option<RawMessage> {
        self.written.try_recv().ok()
    }

    /// Deliver a message to the engine.
    pub fn push(&self, message: impl Into<RawMessage>) {
        if let Some(inject) = &self.inject {
            let _ = inject.send(Ok(message.into()));
        }
    }

    /// Make the engine's inbound stream fail.
    pub fn fail(&self, reason: impl Into<String>) {
        if let Some(inject) = &self.inject {
            let _ = inject.send(Err(LinkError::transport(reason)));
        }
    }

    /// End the engine's inbound stream.
    pub fn hang_up(&mut self) {
        self.inject = None;
    }
}

struct MemorySink {
    written: Option<mpsc::UnboundedSender<RawMessage>>,
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn send(&mut self, message: RawMessage) -> Result<()> {
        let Some(written) = &self.written else {
            return Err(LinkError::transport("memory transport closed"));
        };
        written
            .send(message)
            .map_err(|_| LinkError::transport("memory peer dropped"))
    }

    async fn close(&mut self) -> Result<()> {
        self.written = None;
        Ok(())
    }
}

/// Transport backed by in-process channels.
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryTransport {
    /// Returns the transport and a receiver yielding one [`MemoryPeer`] per
    /// `open()`.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { peers }, rx)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self) -> Result<(Box<dyn TransportSink>, TransportStream)> {
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        self.peers
            .send(MemoryPeer {
                written: written_rx,
                inject: Some(inject_tx),
            })
            .map_err(|_| LinkError::transport("nobody is accepting memory peers"))?;

        let stream = futures::stream::unfold(inject_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        let sink = MemorySink {
            written: Some(written_tx),
        };
        Ok((Box::new(sink), stream))
    }
}

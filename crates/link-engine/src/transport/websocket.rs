//! Persistent websocket transport.

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::OnceLock;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, header};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace};

use super::{RawMessage, Transport, TransportSink, TransportStream};
use crate::error::{LinkError, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Install the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate got there first, which is fine.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Websocket transport with optional sub-protocol negotiation.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    subprotocol: Option<String>,
    headers: Vec<(String, String)>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subprotocol: None,
            headers: Vec::new(),
        }
    }

    /// Request a `Sec-WebSocket-Protocol` during the upgrade.
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = Some(subprotocol.into());
        self
    }

    /// Add a header to the upgrade request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

struct WebSocketSink {
    inner: WsSink,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send(&mut self, message: RawMessage) -> Result<()> {
        let frame = match message {
            RawMessage::Text(text) => Message::Text(text.into()),
            RawMessage::Binary(data) => Message::Binary(data),
        };
        self.inner.send(frame).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await?;
        Ok(())
    }
}

fn header_error(e: impl std::fmt::Display) -> LinkError {
    LinkError::transport(format!("invalid upgrade header: {e}"))
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn open(&self) -> Result<(Box<dyn TransportSink>, TransportStream)> {
        install_rustls_provider();

        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        if let Some(subprotocol) = &self.subprotocol {
            headers.insert(
                header::SEC_WEBSOCKET_PROTOCOL,
                HeaderValue::from_str(subprotocol).map_err(header_error)?,
            );
        }
        for (name, value) in &self.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).map_err(header_error)?,
                HeaderValue::from_str(value).map_err(header_error)?,
            );
        }

        let (ws_stream, _response) = connect_async(request).await?;
        info!(url = %self.url, "WebSocket connected");
        let (sink, stream) = ws_stream.split();

        let stream = stream
            .filter_map(|frame| async move {
                match frame {
                    Ok(Message::Text(text)) => Some(Ok(RawMessage::Text(text.as_str().to_owned()))),
                    Ok(Message::Binary(data)) => Some(Ok(RawMessage::Binary(data))),
                    Ok(Message::Close(frame)) => {
                        debug!(frame = ?frame, "WebSocket close frame received");
                        None
                    }
                    Ok(other) => {
                        trace!(frame = ?other, "Ignoring control frame");
                        None
                    }
                    Err(e) => Some(Err(LinkError::from(e))),
                }
            })
            .boxed();

        Ok((Box::new(WebSocketSink { inner: sink }), stream))
    }
}

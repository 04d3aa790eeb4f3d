//! Interval-polled HTTP transport.
//!
//! Instead of a socket, a timer issues one HTTP request per tick and feeds
//! each response body into the same inbound pipeline a socket would. Writing
//! to the sink triggers one extra poll immediately.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::websocket::install_rustls_provider;
use super::{RawMessage, Transport, TransportSink, TransportStream};
use crate::error::{LinkError, Result};

/// Polls faster than this are refused to protect upstream APIs.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10_000);

const DEFAULT_USER_AGENT: &str = concat!("chatrelay/", env!("CARGO_PKG_VERSION"));

/// HTTP methods a poll may be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Delete,
    Head,
    Options,
    Post,
    Put,
    Patch,
}

impl HttpMethod {
    /// The reqwest method, or an error for HEAD/OPTIONS which cannot carry
    /// a response body worth polling.
    pub fn to_reqwest(self) -> Result<reqwest::Method> {
        match self {
            Self::Get => Ok(reqwest::Method::GET),
            Self::Delete => Ok(reqwest::Method::DELETE),
            Self::Post => Ok(reqwest::Method::POST),
            Self::Put => Ok(reqwest::Method::PUT),
            Self::Patch => Ok(reqwest::Method::PATCH),
            Self::Head => Err(LinkError::UnsupportedMethod("HEAD".into())),
            Self::Options => Err(LinkError::UnsupportedMethod("OPTIONS".into())),
        }
    }

    /// Whether the payload goes into the request body rather than the
    /// query string.
    pub fn carries_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

/// Serializes a poll payload for the query string or the request body.
pub trait BodySerializer: Send + Sync + 'static {
    fn content_type(&self) -> &'static str;

    fn to_body(&self, payload: &Value) -> Result<String>;

    /// Flatten a JSON object into query pairs. Strings are used verbatim,
    /// everything else is JSON-encoded.
    fn to_query(&self, payload: &Value) -> Result<Vec<(String, String)>> {
        let Value::Object(map) = payload else {
            return Err(LinkError::protocol("query payload must be a JSON object"));
        };
        Ok(map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect())
    }
}

/// `application/json` bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonBody;

impl BodySerializer for JsonBody {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn to_body(&self, payload: &Value) -> Result<String> {
        Ok(serde_json::to_string(payload)?)
    }
}

/// `application/x-www-form-urlencoded` bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormBody;

impl BodySerializer for FormBody {
    fn content_type(&self) -> &'static str {
        "application/x-www-form-urlencoded"
    }

    fn to_body(&self, payload: &Value) -> Result<String> {
        Ok(self
            .to_query(payload)?
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&"))
    }
}

/// Caller-supplied accessors evaluated on every poll.
///
/// `None`/empty values fall back to the engine defaults in [`PollConfig`];
/// anything returned here takes precedence over them.
pub trait PollRequest: Send + Sync + 'static {
    fn url(&self) -> String;

    fn method(&self) -> Option<HttpMethod> {
        None
    }

    fn headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn body(&self) -> Option<Value> {
        None
    }
}

/// A fixed request.
#[derive(Debug, Clone)]
pub struct PollBody {
    pub url: String,
    pub method: Option<HttpMethod>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl PollBody {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: None,
            headers: Vec::new(),
            body: None,
        }
    }
}

impl PollRequest for PollBody {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn method(&self) -> Option<HttpMethod> {
        self.method
    }

    fn headers(&self) -> Vec<(String, String)> {
        self.headers.clone()
    }

    fn body(&self) -> Option<Value> {
        self.body.clone()
    }
}

/// Engine-level polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Time between ticks, in milliseconds on the wire.
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    /// Poll once as soon as the transport opens, independent of the timer.
    pub fire_immediately: bool,
    /// Method used when the accessor returns none.
    pub method: HttpMethod,
    /// Headers sent with every request unless the accessor overrides them.
    pub headers: Vec<(String, String)>,
    /// Payload merged under the accessor's payload.
    pub body: Option<Value>,
    /// Buffered responses before polls start waiting on the reader.
    pub queue: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            fire_immediately: false,
            method: HttpMethod::Get,
            headers: Vec::new(),
            body: None,
            queue: 64,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Merge header lists case-insensitively; `overrides` win.
pub(crate) fn merge_headers(
    defaults: &[(String, String)],
    overrides: Vec<(String, String)>,
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = defaults
        .iter()
        .filter(|(name, _)| !overrides.iter().any(|(o, _)| o.eq_ignore_ascii_case(name)))
        .cloned()
        .collect();
    merged.extend(overrides);
    merged
}

/// Merge two payloads. Objects merge key by key with `overrides` winning;
/// any other override replaces the default outright.
pub(crate) fn merge_body(defaults: Option<Value>, overrides: Option<Value>) -> Option<Value> {
    match (defaults, overrides) {
        (Some(Value::Object(mut base)), Some(Value::Object(extra))) => {
            base.extend(extra);
            Some(Value::Object(base))
        }
        (base, None) => base,
        (_, extra) => extra,
    }
}

/// Default HTTP client for polling.
pub fn default_client() -> reqwest::Client {
    install_rustls_provider();
    reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build HTTP client; falling back to reqwest defaults");
            reqwest::Client::new()
        })
}

struct Poller {
    client: reqwest::Client,
    request: Arc<dyn PollRequest>,
    serializer: Arc<dyn BodySerializer>,
    config: PollConfig,
}

impl Poller {
    async fn execute(&self) -> Result<RawMessage> {
        let method = self.request.method().unwrap_or(self.config.method);
        let url = self.request.url();
        let mut builder = self.client.request(method.to_reqwest()?, &url);

        let headers = merge_headers(&self.config.headers, self.request.headers());
        if let Some(payload) = merge_body(self.config.body.clone(), self.request.body()) {
            if method.carries_body() {
                let explicit_type = headers
                    .iter()
                    .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
                if !explicit_type {
                    builder = builder.header(CONTENT_TYPE, self.serializer.content_type());
                }
                builder = builder.body(self.serializer.to_body(&payload)?);
            } else {
                builder = builder.query(&self.serializer.to_query(&payload)?);
            }
        }
        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        trace!(method = ?method, url = %url, "Polling");
        let response = builder.send().await?.error_for_status()?;
        Ok(RawMessage::Text(response.text().await?))
    }

    /// Poll once and push the result into the inbound pipeline.
    async fn poll_into(&self, tx: &mpsc::Sender<Result<RawMessage>>) -> Result<()> {
        let message = self.execute().await?;
        tx.send(Ok(message))
            .await
            .map_err(|_| LinkError::transport("poll transport closed"))
    }
}

/// Timer-driven HTTP transport.
pub struct PollTransport {
    poller: Arc<Poller>,
}

impl PollTransport {
    /// Fails when the interval is below [`MIN_POLL_INTERVAL`], the URL does
    /// not parse or the configured method is HEAD/OPTIONS.
    ///
    /// `client` must be built after a rustls crypto provider was installed
    /// (see [`install_rustls_provider`]); [`default_client`] takes care of it.
    pub fn new(
        client: reqwest::Client,
        request: Arc<dyn PollRequest>,
        config: PollConfig,
    ) -> Result<Self> {
        if config.interval < MIN_POLL_INTERVAL {
            return Err(LinkError::PollIntervalTooShort {
                requested_ms: config.interval.as_millis() as u64,
                minimum_ms: MIN_POLL_INTERVAL.as_millis() as u64,
            });
        }
        config.method.to_reqwest()?;
        url::Url::parse(&request.url())?;
        if let Some(method) = request.method() {
            method.to_reqwest()?;
        }

        Ok(Self {
            poller: Arc::new(Poller {
                client,
                request,
                serializer: Arc::new(JsonBody),
                config,
            }),
        })
    }

    /// Replace the default JSON serializer.
    pub fn with_serializer(self, serializer: Arc<dyn BodySerializer>) -> Self {
        let poller = &self.poller;
        Self {
            poller: Arc::new(Poller {
                client: poller.client.clone(),
                request: poller.request.clone(),
                serializer,
                config: poller.config.clone(),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.poller.config.interval
    }
}

struct PollSink {
    poller: Arc<Poller>,
    tx: Option<mpsc::Sender<Result<RawMessage>>>,
    cancel: CancellationToken,
}

#[async_trait]
impl TransportSink for PollSink {
    /// The payload is ignored: writing means "poll now".
    async fn send(&mut self, _message: RawMessage) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Err(LinkError::transport("poll transport closed"));
        };
        self.poller.poll_into(tx).await
    }

    async fn close(&mut self) -> Result<()> {
        self.cancel.cancel();
        self.tx = None;
        Ok(())
    }
}

impl Drop for PollSink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_timer(
    poller: Arc<Poller>,
    tx: mpsc::Sender<Result<RawMessage>>,
    cancel: CancellationToken,
) {
    let period = poller.config.interval;
    let mut in_flight = JoinSet::new();

    let spawn_poll = |in_flight: &mut JoinSet<()>| {
        let poller = poller.clone();
        let tx = tx.clone();
        in_flight.spawn(async move {
            if let Err(e) = poller.poll_into(&tx).await {
                warn!(error = %e, "Poll failed");
            }
        });
    };

    if poller.config.fire_immediately {
        spawn_poll(&mut in_flight);
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => spawn_poll(&mut in_flight),
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    }

    in_flight.shutdown().await;
    debug!("Poll timer stopped");
}

#[async_trait]
impl Transport for PollTransport {
    fn name(&self) -> &str {
        "poll"
    }

    async fn open(&self) -> Result<(Box<dyn TransportSink>, TransportStream)> {
        let (tx, rx) = mpsc::channel(self.poller.config.queue.max(1));
        let cancel = CancellationToken::new();

        tokio::spawn(run_timer(self.poller.clone(), tx.clone(), cancel.clone()));
        info!(
            url = %self.poller.request.url(),
            interval_ms = self.poller.config.interval.as_millis() as u64,
            "Polling started"
        );

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        let sink = PollSink {
            poller: self.poller.clone(),
            tx: Some(tx),
            cancel,
        };
        Ok((Box::new(sink), stream))
    }
}

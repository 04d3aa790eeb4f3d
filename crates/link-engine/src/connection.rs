//! The connection engine.
//!
//! A [`Connection`] drives one [`Transport`] for one [`LinkProtocol`]:
//!
//! * a writer task owns the transport sink and serializes every write,
//! * a reader task parses inbound payloads and broadcasts them,
//! * the handshake runs step by step on top of that broadcast,
//! * an optional heartbeat task keeps the link alive once open.

use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::handshake::{HandshakeStep, Verdict};
use crate::protocol::{InboundMessage, LinkProtocol};
use crate::transport::{RawMessage, Transport, TransportSink, TransportStream};

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    HandshakeInProgress,
    Open,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::HandshakeInProgress => "handshaking",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Shared handle to one parsed inbound message.
pub type Inbound<T> = Arc<InboundMessage<T>>;

struct Write {
    message: RawMessage,
    ack: Option<oneshot::Sender<Result<()>>>,
}

/// Queue a write and wait until the transport accepted it.
async fn write_acked(writes: &mpsc::Sender<Write>, message: RawMessage) -> Result<()> {
    let (ack, done) = oneshot::channel();
    writes
        .send(Write {
            message,
            ack: Some(ack),
        })
        .await
        .map_err(|_| LinkError::transport("connection writer stopped"))?;
    done.await
        .map_err(|_| LinkError::transport("connection writer stopped"))?
}

/// Everything that lives exactly as long as one transport.
struct Session<T> {
    writes: mpsc::Sender<Write>,
    template: broadcast::Receiver<Inbound<T>>,
    shutdown: CancellationToken,
    closed: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<T> Session<T> {
    async fn close(mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await
                && e.is_panic()
            {
                error!(error = %e, "Connection task panicked");
            }
        }
    }
}

impl<T> Drop for Session<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Puts the state back to `Disconnected` unless disarmed, so a failed or
/// dropped `connect()` never leaves the connection stuck half-way.
struct ResetOnDrop<'a> {
    state: &'a Mutex<ConnectionState>,
    armed: bool,
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.lock() = ConnectionState::Disconnected;
        }
    }
}

/// A duplex connection for protocol `P`.
pub struct Connection<P: LinkProtocol> {
    protocol: Arc<P>,
    transport: Arc<dyn Transport>,
    config: LinkConfig,
    state: Mutex<ConnectionState>,
    session: Mutex<Option<Session<P::Inbound>>>,
}

impl<P: LinkProtocol> Connection<P> {
    pub fn new(protocol: P, transport: impl Transport, config: LinkConfig) -> Self {
        Self {
            protocol: Arc::new(protocol),
            transport: Arc::new(transport),
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            session: Mutex::new(None),
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState, op: &str) -> Result<()> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(LinkError::precondition(format!(
                "cannot {op} while {state}"
            )));
        }
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: ConnectionState) {
        *self.state.lock() = to;
    }

    /// Open the transport and run the handshake.
    ///
    /// Resolves once the last step has been verified. On any failure the
    /// transport is torn down and the connection is `Disconnected` again.
    pub async fn connect(&self) -> Result<()> {
        self.transition(
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            "connect",
        )?;
        let mut reset = ResetOnDrop {
            state: &self.state,
            armed: true,
        };

        info!(
            protocol = self.protocol.name(),
            transport = self.transport.name(),
            "Connecting"
        );
        let session = match self.establish().await {
            Ok(session) => session,
            Err(e) => {
                warn!(protocol = self.protocol.name(), error = %e, "Connect failed");
                return Err(e);
            }
        };

        *self.session.lock() = Some(session);
        reset.armed = false;
        self.set_state(ConnectionState::Open);
        info!(protocol = self.protocol.name(), "Connection open");
        Ok(())
    }

    async fn establish(&self) -> Result<Session<P::Inbound>> {
        let (sink, stream) = self.transport.open().await?;
        let (inbound, template) = broadcast::channel(self.config.channel_capacity.max(1));
        let (writes, write_rx) = mpsc::channel(self.config.write_queue.max(1));
        let shutdown = CancellationToken::new();
        let closed = shutdown.child_token();

        let mut session = Session {
            writes,
            template,
            shutdown,
            closed,
            tasks: Vec::with_capacity(3),
        };
        session
            .tasks
            .push(tokio::spawn(write_loop(sink, write_rx, session.closed.clone())));
        session.tasks.push(tokio::spawn(read_loop(
            self.protocol.clone(),
            stream,
            inbound,
            session.writes.clone(),
            session.shutdown.clone(),
            session.closed.clone(),
        )));

        self.set_state(ConnectionState::HandshakeInProgress);
        if let Err(e) = self.run_handshake(&session).await {
            session.close().await;
            return Err(e);
        }

        if let Some((period, message)) = self.protocol.heartbeat() {
            match self.protocol.serialize_message(&message) {
                Ok(raw) => session.tasks.push(tokio::spawn(heartbeat_loop(
                    period,
                    raw,
                    session.writes.clone(),
                    session.closed.clone(),
                ))),
                Err(e) => warn!(error = %e, "Heartbeat disabled: message does not serialize"),
            }
        }
        Ok(session)
    }

    async fn run_handshake(&self, session: &Session<P::Inbound>) -> Result<()> {
        let steps = self.protocol.handshake_steps();
        let total = steps.len();

        for (index, step) in steps.iter().enumerate() {
            let number = index + 1;

            for command in step.commands() {
                let raw = self.protocol.serialize_message(command)?;
                write_acked(&session.writes, raw)
                    .await
                    .map_err(|e| LinkError::HandshakeAborted {
                        step: number,
                        reason: e.to_string(),
                    })?;
            }
            // Only messages that arrive after the last command was written
            // may complete the step.
            let mut listener = session.template.resubscribe();
            debug!(
                protocol = self.protocol.name(),
                step = number,
                total,
                "Handshake step sent"
            );

            let verified = await_verdict(step, &mut listener, number);
            match self.config.handshake_timeout {
                Some(limit) => tokio::time::timeout(limit, verified)
                    .await
                    .map_err(|_| LinkError::HandshakeTimeout { step: number })??,
                None => verified.await?,
            }
            debug!(protocol = self.protocol.name(), step = number, "Handshake step verified");
        }
        Ok(())
    }

    /// Tear the transport down. Every data stream completes.
    pub async fn disconnect(&self) -> Result<()> {
        self.transition(
            ConnectionState::Open,
            ConnectionState::Closing,
            "disconnect",
        )?;
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
        info!(protocol = self.protocol.name(), "Disconnected");
        Ok(())
    }

    /// `disconnect()` followed by `connect()`. Not atomic: callers may
    /// observe the intermediate states.
    pub async fn reconnect(&self) -> Result<()> {
        self.disconnect().await?;
        self.connect().await
    }

    fn writer(&self, op: &str) -> Result<mpsc::Sender<Write>> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(LinkError::precondition(format!("cannot {op} while {state}")));
        }
        self.session
            .lock()
            .as_ref()
            .map(|session| session.writes.clone())
            .ok_or_else(|| LinkError::precondition(format!("cannot {op} without a session")))
    }

    /// Serialize and write one message. Resolves once the transport
    /// accepted the write.
    pub async fn send(&self, message: &P::Outbound) -> Result<()> {
        let writes = self.writer("send")?;
        let raw = self.protocol.serialize_message(message)?;
        trace!(protocol = self.protocol.name(), "Sending message");
        write_acked(&writes, raw).await
    }

    /// A new listener over every message parsed from now on. Every listener
    /// sees the same messages in the same order.
    pub fn data_stream(&self) -> Result<BoxStream<'static, Inbound<P::Inbound>>> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(LinkError::precondition(format!(
                "cannot open a data stream while {state}"
            )));
        }
        let guard = self.session.lock();
        let session = guard
            .as_ref()
            .ok_or_else(|| LinkError::precondition("no active session"))?;
        Ok(fan_out(session.template.resubscribe()))
    }

    /// Resolves when the current transport stops delivering messages,
    /// either through `disconnect()` or because the remote side went away.
    /// Resolves immediately when there is no transport.
    pub async fn closed(&self) {
        let token = self
            .session
            .lock()
            .as_ref()
            .map(|session| session.closed.clone());
        if let Some(token) = token {
            token.cancelled().await;
        }
    }
}

impl<P: LinkProtocol> fmt::Debug for Connection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("protocol", &self.protocol.name())
            .field("transport", &self.transport.name())
            .field("state", &self.state())
            .finish()
    }
}

async fn await_verdict<O, I>(
    step: &HandshakeStep<O, I>,
    listener: &mut broadcast::Receiver<Inbound<I>>,
    number: usize,
) -> Result<()> {
    loop {
        match listener.recv().await {
            Ok(message) => match step.verify(&message.parsed) {
                Verdict::Pending => {}
                Verdict::Accepted => return Ok(()),
                Verdict::Rejected(reason) => {
                    return Err(LinkError::HandshakeRejected {
                        step: number,
                        reason,
                    });
                }
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(step = number, skipped, "Handshake listener lagged");
            }
            Err(RecvError::Closed) => {
                return Err(LinkError::HandshakeAborted {
                    step: number,
                    reason: "transport closed".into(),
                });
            }
        }
    }
}

fn fan_out<T: Clone + Send + 'static>(rx: broadcast::Receiver<T>) -> BoxStream<'static, T> {
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Data stream lagged, messages skipped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

async fn write_loop(
    mut sink: Box<dyn TransportSink>,
    mut writes: mpsc::Receiver<Write>,
    closed: CancellationToken,
) {
    loop {
        let write = tokio::select! {
            _ = closed.cancelled() => break,
            write = writes.recv() => match write {
                Some(write) => write,
                None => break,
            },
        };
        let result = sink.send(write.message).await;
        match write.ack {
            Some(ack) => {
                let _ = ack.send(result);
            }
            None => {
                if let Err(e) = result {
                    warn!(error = %e, "Write failed");
                }
            }
        }
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Transport close failed");
    }
}

async fn read_loop<P: LinkProtocol>(
    protocol: Arc<P>,
    mut stream: TransportStream,
    inbound: broadcast::Sender<Inbound<P::Inbound>>,
    writes: mpsc::Sender<Write>,
    shutdown: CancellationToken,
    closed: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(raw)) => {
                let parsed = match protocol.parse_message(&raw) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(protocol = protocol.name(), error = %e, "Dropping unparseable message");
                        continue;
                    }
                };
                for item in parsed {
                    if let Some(reply) = protocol.reply_to(&item) {
                        match protocol.serialize_message(&reply) {
                            Ok(message) => {
                                if writes.send(Write { message, ack: None }).await.is_err() {
                                    debug!("Writer gone, automatic reply dropped");
                                }
                            }
                            Err(e) => warn!(error = %e, "Automatic reply does not serialize"),
                        }
                    }
                    // Only fails when nobody listens, which is fine.
                    let _ = inbound.send(Arc::new(InboundMessage::new(raw.clone(), item)));
                }
            }
            Some(Err(e)) => {
                error!(protocol = protocol.name(), error = %e, "Transport failed");
                break;
            }
            None => {
                info!(protocol = protocol.name(), "Transport closed by remote");
                break;
            }
        }
    }
    closed.cancel();
}

async fn heartbeat_loop(
    period: Duration,
    message: RawMessage,
    writes: mpsc::Sender<Write>,
    closed: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            _ = ticker.tick() => {
                if writes.send(Write { message: message.clone(), ack: None }).await.is_err() {
                    break;
                }
                debug!("Heartbeat sent");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryPeer, MemoryTransport};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Answers `ack` while the write of `trigger` is still in flight.
    struct EarlyAck {
        trigger: &'static str,
        ack: &'static str,
    }

    struct EarlyAckSink {
        trigger: &'static str,
        ack: &'static str,
        inbound: mpsc::UnboundedSender<Result<RawMessage>>,
    }

    #[async_trait]
    impl TransportSink for EarlyAckSink {
        async fn send(&mut self, message: RawMessage) -> Result<()> {
            if message.as_text() == Some(self.trigger) {
                let _ = self.inbound.send(Ok(RawMessage::from(self.ack)));
                // Let the reader broadcast the ack before this write completes.
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Transport for EarlyAck {
        fn name(&self) -> &str {
            "early-ack"
        }

        async fn open(&self) -> Result<(Box<dyn TransportSink>, TransportStream)> {
            let (inbound, rx) = mpsc::unbounded_channel();
            let stream = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed();
            let sink = EarlyAckSink {
                trigger: self.trigger,
                ack: self.ack,
                inbound,
            };
            Ok((Box::new(sink), stream))
        }
    }

    /// Line protocol whose steps are `(commands, acknowledgement)` pairs.
    struct Script {
        steps: Vec<(Vec<&'static str>, &'static str)>,
        refusal: Option<&'static str>,
        heartbeat: Option<Duration>,
    }

    impl Script {
        fn new(steps: Vec<(Vec<&'static str>, &'static str)>) -> Self {
            Self {
                steps,
                refusal: None,
                heartbeat: None,
            }
        }
    }

    impl LinkProtocol for Script {
        type Outbound = String;
        type Inbound = String;

        fn name(&self) -> &str {
            "script"
        }

        fn handshake_steps(&self) -> Vec<HandshakeStep<String, String>> {
            self.steps
                .iter()
                .map(|(commands, ack)| {
                    let ack = ack.to_string();
                    let refusal = self.refusal.map(str::to_string);
                    HandshakeStep::with_verdict(
                        commands.iter().map(|c| c.to_string()).collect(),
                        move |m: &String| {
                            if *m == ack {
                                Verdict::Accepted
                            } else if refusal.as_deref() == Some(m.as_str()) {
                                Verdict::Rejected(m.clone())
                            } else {
                                Verdict::Pending
                            }
                        },
                    )
                })
                .collect()
        }

        fn parse_message(&self, raw: &RawMessage) -> Result<Vec<String>> {
            let text = raw
                .as_text()
                .ok_or_else(|| LinkError::protocol("not text"))?;
            Ok(text.lines().map(str::to_string).collect())
        }

        fn serialize_message(&self, message: &String) -> Result<RawMessage> {
            Ok(RawMessage::Text(message.clone()))
        }

        fn reply_to(&self, message: &String) -> Option<String> {
            (message == "PING").then(|| "PONG".to_string())
        }

        fn heartbeat(&self) -> Option<(Duration, String)> {
            self.heartbeat.map(|period| (period, "KEEPALIVE".to_string()))
        }
    }

    fn two_steps() -> Script {
        Script::new(vec![
            (vec!["HELLO"], "WELCOME"),
            (vec!["AUTH a", "AUTH b"], "AUTHED"),
        ])
    }

    fn start(
        protocol: Script,
        config: LinkConfig,
    ) -> (
        Arc<Connection<Script>>,
        UnboundedReceiver<MemoryPeer>,
        JoinHandle<Result<()>>,
    ) {
        let (transport, peers) = MemoryTransport::new();
        let conn = Arc::new(Connection::new(protocol, transport, config));
        let connecting = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect().await }
        });
        (conn, peers, connecting)
    }

    async fn open(protocol: Script) -> (Arc<Connection<Script>>, MemoryPeer) {
        let (conn, mut peers, connecting) = start(protocol, LinkConfig::default());
        let peer = peers.recv().await.unwrap();
        connecting.await.unwrap().unwrap();
        (conn, peer)
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let (conn, mut peers, connecting) = start(two_steps(), LinkConfig::default());
        let mut peer = peers.recv().await.unwrap();

        assert_eq!(peer.recv().await, Some(RawMessage::from("HELLO")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Step two has not started: nothing else was written.
        assert!(peer.try_recv().is_none());
        assert_eq!(conn.state(), ConnectionState::HandshakeInProgress);

        peer.push("unrelated");
        peer.push("WELCOME");
        assert_eq!(peer.recv().await, Some(RawMessage::from("AUTH a")));
        assert_eq!(peer.recv().await, Some(RawMessage::from("AUTH b")));
        peer.push("AUTHED");

        connecting.await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_connect_waits_for_pong() {
        let (conn, mut peers, connecting) =
            start(Script::new(vec![(vec!["PING"], "PONG")]), LinkConfig::default());
        let mut peer = peers.recv().await.unwrap();

        assert_eq!(peer.recv().await, Some(RawMessage::from("PING")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!connecting.is_finished());

        peer.push("PONG");
        connecting.await.unwrap().unwrap();
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_acknowledgement_before_step_start_is_ignored() {
        let config = LinkConfig::default().with_handshake_timeout(Duration::from_millis(200));
        let (conn, mut peers, connecting) = start(two_steps(), config);
        let mut peer = peers.recv().await.unwrap();

        assert_eq!(peer.recv().await, Some(RawMessage::from("HELLO")));
        peer.push("AUTHED\nWELCOME");
        assert_eq!(peer.recv().await, Some(RawMessage::from("AUTH a")));

        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, LinkError::HandshakeTimeout { step: 2 }));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_acknowledgement_during_command_batch_is_ignored() {
        let protocol = Script::new(vec![(vec!["A", "B"], "OK")]);
        let config = LinkConfig::default().with_handshake_timeout(Duration::from_millis(200));
        let conn = Connection::new(protocol, EarlyAck { trigger: "B", ack: "OK" }, config);

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, LinkError::HandshakeTimeout { step: 1 }));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_rejection_fails_connect() {
        let mut protocol = two_steps();
        protocol.refusal = Some("DENIED");
        let (conn, mut peers, connecting) = start(protocol, LinkConfig::default());
        let mut peer = peers.recv().await.unwrap();

        assert_eq!(peer.recv().await, Some(RawMessage::from("HELLO")));
        peer.push("DENIED");

        match connecting.await.unwrap() {
            Err(LinkError::HandshakeRejected { step, reason }) => {
                assert_eq!(step, 1);
                assert_eq!(reason, "DENIED");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        // The transport was torn down.
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_transport_loss_aborts_handshake() {
        let (conn, mut peers, connecting) = start(two_steps(), LinkConfig::default());
        let mut peer = peers.recv().await.unwrap();

        assert_eq!(peer.recv().await, Some(RawMessage::from("HELLO")));
        peer.hang_up();

        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, LinkError::HandshakeAborted { step: 1, .. }));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_out_of_state_calls_are_precondition_errors() {
        let (transport, _peers) = MemoryTransport::new();
        let conn = Connection::new(two_steps(), transport, LinkConfig::default());

        assert!(matches!(conn.disconnect().await, Err(LinkError::Precondition(_))));
        assert!(matches!(
            conn.send(&"x".to_string()).await,
            Err(LinkError::Precondition(_))
        ));
        assert!(matches!(conn.data_stream(), Err(LinkError::Precondition(_))));
        assert!(matches!(conn.reconnect().await, Err(LinkError::Precondition(_))));
        // closed() has nothing to wait for.
        conn.closed().await;
    }

    #[tokio::test]
    async fn test_calls_during_handshake_are_precondition_errors() {
        let (conn, mut peers, connecting) = start(two_steps(), LinkConfig::default());
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(peer.recv().await, Some(RawMessage::from("HELLO")));

        assert!(matches!(conn.connect().await, Err(LinkError::Precondition(_))));
        assert!(matches!(conn.disconnect().await, Err(LinkError::Precondition(_))));
        assert!(matches!(
            conn.send(&"x".to_string()).await,
            Err(LinkError::Precondition(_))
        ));

        peer.push("WELCOME");
        assert_eq!(peer.recv().await, Some(RawMessage::from("AUTH a")));
        assert_eq!(peer.recv().await, Some(RawMessage::from("AUTH b")));
        peer.push("AUTHED");
        connecting.await.unwrap().unwrap();
        assert!(matches!(conn.connect().await, Err(LinkError::Precondition(_))));
    }

    #[tokio::test]
    async fn test_data_streams_share_order_and_end_on_disconnect() {
        let (conn, mut peer) = open(Script::new(vec![])).await;
        let mut first = conn.data_stream().unwrap();
        let mut second = conn.data_stream().unwrap();

        peer.push("a\nb");
        peer.push(RawMessage::Binary(Bytes::from_static(b"\xff")));
        peer.push("c");

        for stream in [&mut first, &mut second] {
            let mut seen = Vec::new();
            for _ in 0..3 {
                seen.push(stream.next().await.unwrap().parsed.clone());
            }
            assert_eq!(seen, ["a", "b", "c"]);
        }

        conn.send(&"out".to_string()).await.unwrap();
        assert_eq!(peer.recv().await, Some(RawMessage::from("out")));

        conn.disconnect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(first.next().await.is_none());
        assert!(second.next().await.is_none());
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_ping_gets_automatic_pong() {
        let (conn, mut peer) = open(Script::new(vec![])).await;
        let mut stream = conn.data_stream().unwrap();

        peer.push("PING");
        assert_eq!(peer.recv().await, Some(RawMessage::from("PONG")));
        // The PING itself is still delivered.
        assert_eq!(stream.next().await.unwrap().parsed, "PING");
    }

    #[tokio::test]
    async fn test_closed_resolves_when_remote_hangs_up() {
        let (conn, mut peer) = open(Script::new(vec![])).await;
        let mut stream = conn.data_stream().unwrap();

        peer.hang_up();
        conn.closed().await;
        assert!(stream.next().await.is_none());

        // Still formally open until the caller tears it down.
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(conn.send(&"late".to_string()).await.is_err());
        conn.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_opens_a_new_transport() {
        let (transport, mut peers) = MemoryTransport::new();
        let conn = Connection::new(Script::new(vec![]), transport, LinkConfig::default());

        conn.connect().await.unwrap();
        let mut old = peers.recv().await.unwrap();
        conn.reconnect().await.unwrap();
        let mut new = peers.recv().await.unwrap();

        assert_eq!(old.recv().await, None);
        conn.send(&"hi".to_string()).await.unwrap();
        assert_eq!(new.recv().await, Some(RawMessage::from("hi")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_is_sent_periodically() {
        let mut protocol = Script::new(vec![]);
        protocol.heartbeat = Some(Duration::from_secs(30));
        let (_conn, mut peer) = open(protocol).await;

        assert_eq!(peer.recv().await, Some(RawMessage::from("KEEPALIVE")));
        assert_eq!(peer.recv().await, Some(RawMessage::from("KEEPALIVE")));
    }
}

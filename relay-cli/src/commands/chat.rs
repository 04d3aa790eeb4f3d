use anyhow::Result;
use futures::StreamExt;
use link_engine::protocols::{ChatMessage, IrcMessage, IrcProtocol};
use link_engine::Connection;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use topic_bus::{BusConfig, Publisher, SingleJson, TopicPublisher};
use tracing::{debug, info, warn};

use super::CHAT_KIND;
use crate::config::AppConfig;

type ChatPublisher = TopicPublisher<SingleJson<ChatMessage>>;

/// Join `channel` and publish every chat line until cancelled. Lost
/// connections are re-established under the configured retry policy.
pub async fn run(
    channel: &str,
    login: Option<(String, String)>,
    config: &AppConfig,
    bus: BusConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let protocol = match login {
        Some((nick, token)) => IrcProtocol::with_oauth(channel, nick, token),
        None => IrcProtocol::anonymous(channel),
    };
    let channel = protocol.channel().to_string();
    let conn = Connection::new(protocol, IrcProtocol::transport(), config.link.clone());

    let publisher = Arc::new(Publisher::new(bus));
    publisher.connect().await?;
    let chat = TopicPublisher::new(publisher.clone(), CHAT_KIND, SingleJson::new());

    let outcome = relay(&conn, &chat, &channel, config, &cancel).await;

    if conn.is_open() {
        conn.disconnect().await?;
    }
    publisher.disconnect().await?;
    outcome
}

async fn relay(
    conn: &Connection<IrcProtocol>,
    chat: &ChatPublisher,
    channel: &str,
    config: &AppConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    'session: loop {
        let connected = config.retry.run(cancel, "chat connect", move |_| async move {
            if conn.is_open() {
                conn.reconnect().await
            } else {
                conn.connect().await
            }
        });
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = connected => result?,
        }

        let mut stream = conn.data_stream()?;
        info!(channel, "Relaying chat");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break 'session,
                message = stream.next() => match message {
                    Some(message) => forward(chat, &message.parsed).await,
                    None => {
                        warn!(channel, "Chat connection lost, reconnecting");
                        continue 'session;
                    }
                },
            }
        }
    }
    Ok(())
}

async fn forward(chat: &ChatPublisher, message: &IrcMessage) {
    let Some(line) = ChatMessage::from_irc(message) else {
        return;
    };
    debug!(channel = %line.channel, user = %line.login, "Chat line");
    if let Err(e) = chat.publish(&[&line.channel, &line.user_id], &line).await {
        warn!(error = %e, "Failed to publish chat line");
    }
}

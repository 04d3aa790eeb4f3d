use anyhow::Result;
use futures::StreamExt;
use link_engine::protocols::JsonPollProtocol;
use link_engine::transport::{HttpMethod, PollBody, default_client};
use link_engine::{Connection, PollTransport};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use topic_bus::{BusConfig, Publisher, SingleJson, Topic, TopicPublisher};
use tracing::{info, warn};

use super::POLL_KIND;
use crate::config::AppConfig;

pub struct PollOptions {
    pub url: String,
    pub name: String,
    pub interval: Option<u64>,
    pub method: Option<HttpMethod>,
    pub headers: Vec<(String, String)>,
    pub fire_immediately: bool,
}

/// Poll until cancelled, publishing each JSON response on `poll:<name>`.
pub async fn run(
    options: PollOptions,
    config: &AppConfig,
    bus: BusConfig,
    cancel: CancellationToken,
) -> Result<()> {
    // Reject names that cannot form a topic before touching the network.
    Topic::with_scope(POLL_KIND, &[&options.name])?;

    let mut poll = config.poll.clone();
    if let Some(secs) = options.interval {
        poll.interval = Duration::from_secs(secs);
    }
    poll.fire_immediately |= options.fire_immediately;
    let request = PollBody {
        url: options.url,
        method: options.method,
        headers: options.headers,
        body: None,
    };
    let transport = PollTransport::new(default_client(), Arc::new(request), poll)?;

    let conn = Connection::new(
        JsonPollProtocol::<Value>::new(options.name.clone()),
        transport,
        config.link.clone(),
    );
    let publisher = Arc::new(Publisher::new(bus));
    publisher.connect().await?;
    let responses = TopicPublisher::new(publisher.clone(), POLL_KIND, SingleJson::<Value>::new());

    conn.connect().await?;
    let mut stream = conn.data_stream()?;
    info!(name = %options.name, "Polling");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next() => match message {
                Some(message) => {
                    if let Err(e) = responses.publish(&[&options.name], &message.parsed).await {
                        warn!(error = %e, "Failed to publish poll response");
                    }
                }
                None => break,
            },
        }
    }

    conn.disconnect().await?;
    publisher.disconnect().await?;
    Ok(())
}

mod chat;
mod hub;
mod poll;
mod publish;
mod tail;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use topic_bus::BusConfig;

use crate::cli::Commands;
use crate::config::AppConfig;

/// Event kind of relayed chat lines.
pub const CHAT_KIND: &str = "chat";
/// Event kind of relayed poll responses.
pub const POLL_KIND: &str = "poll";

pub async fn run(
    command: Commands,
    config: &AppConfig,
    bus: BusConfig,
    cancel: CancellationToken,
) -> Result<()> {
    match command {
        Commands::Hub { bind } => {
            let addr = bind.unwrap_or_else(|| bus.endpoint.clone());
            hub::run(&addr, bus, cancel).await
        }
        Commands::Publish { topic, frames } => publish::run(&topic, frames, bus).await,
        Commands::Tail { segments, prefix } => tail::run(segments, prefix, bus, cancel).await,
        Commands::Chat {
            channel,
            nick,
            token,
        } => {
            let login = nick.zip(token);
            chat::run(&channel, login, config, bus, cancel).await
        }
        Commands::Poll {
            url,
            name,
            interval,
            method,
            headers,
            now,
        } => {
            let options = poll::PollOptions {
                url,
                name,
                interval,
                method: method.map(Into::into),
                headers,
                fire_immediately: now,
            };
            poll::run(options, config, bus, cancel).await
        }
    }
}

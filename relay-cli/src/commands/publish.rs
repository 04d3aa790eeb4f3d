use anyhow::Result;
use bytes::Bytes;
use topic_bus::{BusConfig, Publisher, Topic};
use tracing::info;

pub async fn run(topic: &str, frames: Vec<String>, bus: BusConfig) -> Result<()> {
    let topic = Topic::parse(topic)?;
    let frames: Vec<Bytes> = frames.into_iter().map(Bytes::from).collect();
    let count = frames.len();

    let publisher = Publisher::new(bus);
    publisher.connect().await?;
    publisher.send(&topic, frames).await?;
    publisher.disconnect().await?;

    info!(topic = %topic, frames = count, "Published");
    Ok(())
}

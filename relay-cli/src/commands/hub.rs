use anyhow::Result;
use tokio_util::sync::CancellationToken;
use topic_bus::{Broker, BusConfig};
use tracing::info;

pub async fn run(addr: &str, bus: BusConfig, cancel: CancellationToken) -> Result<()> {
    let broker = Broker::bind(addr, bus).await?;
    info!(addr = %broker.local_addr()?, "Hub listening");
    broker.run(cancel).await?;
    info!("Hub stopped");
    Ok(())
}

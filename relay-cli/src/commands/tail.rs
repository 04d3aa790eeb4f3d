use anyhow::Result;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use topic_bus::{BusConfig, Subscriber, TopicFilter, TopicMessage};
use tracing::info;

pub async fn run(
    segments: Vec<String>,
    prefix: String,
    bus: BusConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let filter = TopicFilter::new(segments)?;
    let subscriber = Subscriber::new(bus, vec![prefix], filter).with_cancellation(cancel.clone());
    subscriber.connect().await?;
    let mut stream = subscriber.stream()?;
    info!(filter = ?subscriber.filter().required(), "Tailing");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next() => match message {
                Some(message) => println!("{}", render(&message)),
                None => {
                    info!("Hub connection closed");
                    break;
                }
            },
        }
    }

    subscriber.disconnect().await?;
    Ok(())
}

/// `topic<TAB>frame<TAB>frame...`, frames decoded as lossy UTF-8.
fn render(message: &TopicMessage) -> String {
    let mut line = message.topic.to_string();
    for frame in &message.frames {
        line.push('\t');
        line.push_str(&String::from_utf8_lossy(frame));
    }
    line
}

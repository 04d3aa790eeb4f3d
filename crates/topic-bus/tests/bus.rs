use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use topic_bus::{
    Broker, BusConfig, BusError, JsonArray, Publisher, SingleJson, Subscriber, Topic, TopicFilter,
    TopicPublisher, TopicsSubscriber,
};

const WAIT: Duration = Duration::from_secs(5);

async fn start_hub() -> (BusConfig, CancellationToken) {
    let broker = Broker::bind("127.0.0.1:0", BusConfig::default())
        .await
        .expect("bind hub");
    let endpoint = broker.local_addr().expect("local addr").to_string();
    let cancel = CancellationToken::new();
    tokio::spawn(broker.run(cancel.clone()));
    (BusConfig::default().with_endpoint(endpoint), cancel)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Cheer {
    user_id: String,
    bits: u32,
}

#[tokio::test]
async fn send_without_subscribers_succeeds() {
    let (config, cancel) = start_hub().await;
    let publisher = Publisher::new(config);
    publisher.connect().await.unwrap();

    publisher
        .send_str("topic", vec![Bytes::from_static(b"payload")])
        .await
        .expect("best-effort send must not fail");

    publisher.disconnect().await.unwrap();
    cancel.cancel();
}

#[tokio::test]
async fn intersection_filter_applies_end_to_end() {
    let (config, cancel) = start_hub().await;
    let subscriber = Subscriber::for_kind(config.clone(), "cheer", &["user42"]).unwrap();
    subscriber.connect().await.unwrap();
    let mut stream = subscriber.stream().unwrap();

    let publisher = Publisher::new(config);
    publisher.connect().await.unwrap();
    publisher
        .send_str("cheer:user7", vec![Bytes::from_static(b"skip")])
        .await
        .unwrap();
    publisher
        .send_str("follow:user42", vec![Bytes::from_static(b"skip")])
        .await
        .unwrap();
    publisher
        .send_str("cheer:user42:extra", vec![Bytes::from_static(b"keep")])
        .await
        .unwrap();

    let message = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(message.topic.as_str(), "cheer:user42:extra");
    assert_eq!(message.frames, vec![Bytes::from_static(b"keep")]);

    subscriber.disconnect().await.unwrap();
    cancel.cancel();
}

#[tokio::test]
async fn every_subscriber_gets_every_message() {
    let (config, cancel) = start_hub().await;
    let first = Subscriber::new(config.clone(), vec!["tick".into()], TopicFilter::all());
    let second = Subscriber::new(config.clone(), vec!["tick".into()], TopicFilter::all());
    first.connect().await.unwrap();
    second.connect().await.unwrap();
    let mut first_stream = first.stream().unwrap();
    let mut second_stream = second.stream().unwrap();

    let publisher = Publisher::new(config);
    publisher.connect().await.unwrap();
    for i in 0..10u8 {
        publisher
            .send_str("tick", vec![Bytes::from(vec![i])])
            .await
            .unwrap();
    }

    for stream in [&mut first_stream, &mut second_stream] {
        for i in 0..10u8 {
            let message = timeout(WAIT, stream.next()).await.unwrap().unwrap();
            assert_eq!(message.frames, vec![Bytes::from(vec![i])]);
        }
    }

    cancel.cancel();
}

#[tokio::test]
async fn listeners_on_one_subscriber_see_the_same_order() {
    let (config, cancel) = start_hub().await;
    let subscriber = Subscriber::new(config.clone(), vec![], TopicFilter::all());
    subscriber.connect().await.unwrap();
    let mut a = subscriber.stream().unwrap();
    let mut b = subscriber.stream().unwrap();

    let publisher = Publisher::new(config);
    publisher.connect().await.unwrap();
    for topic in ["x:1", "y:2", "z:3"] {
        publisher.send_str(topic, vec![]).await.unwrap();
    }

    let mut seen_a = Vec::new();
    let mut seen_b = Vec::new();
    for _ in 0..3 {
        seen_a.push(timeout(WAIT, a.next()).await.unwrap().unwrap().topic);
        seen_b.push(timeout(WAIT, b.next()).await.unwrap().unwrap().topic);
    }
    assert_eq!(seen_a, seen_b);

    subscriber.disconnect().await.unwrap();
    assert!(timeout(WAIT, a.next()).await.unwrap().is_none());
    assert!(timeout(WAIT, b.next()).await.unwrap().is_none());
    cancel.cancel();
}

#[tokio::test]
async fn typed_single_json_round_trip_and_decode_errors() {
    let (config, cancel) = start_hub().await;
    let subscriber =
        TopicsSubscriber::new(config.clone(), "cheer", &["user42"], SingleJson::<Cheer>::new())
            .unwrap();
    subscriber.connect().await.unwrap();
    let mut events = subscriber.stream().unwrap();

    let publisher = Arc::new(Publisher::new(config));
    publisher.connect().await.unwrap();
    let cheers = TopicPublisher::new(publisher.clone(), "cheer", SingleJson::<Cheer>::new());

    let cheer = Cheer {
        user_id: "user42".into(),
        bits: 500,
    };
    cheers.publish(&["user42"], &cheer).await.unwrap();
    publisher
        .send_str(
            "cheer:user42",
            vec![Bytes::from_static(b"{}"), Bytes::from_static(b"{}")],
        )
        .await
        .unwrap();
    cheers.publish(&["user42", "again"], &cheer).await.unwrap();

    let first = timeout(WAIT, events.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.item, cheer);
    assert_eq!(first.topic, Topic::parse("cheer:user42").unwrap());

    let second = timeout(WAIT, events.next()).await.unwrap().unwrap();
    assert!(matches!(
        second,
        Err(BusError::FrameCount {
            expected: 1,
            actual: 2
        })
    ));

    let third = timeout(WAIT, events.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(third.topic.as_str(), "cheer:user42:again");

    subscriber.disconnect().await.unwrap();
    cancel.cancel();
}

#[tokio::test]
async fn typed_array_framing() {
    let (config, cancel) = start_hub().await;
    let subscriber =
        TopicsSubscriber::new(config.clone(), "queue", &["video"], JsonArray::<String>::new())
            .unwrap();
    subscriber.connect().await.unwrap();
    let mut events = subscriber.stream().unwrap();

    let publisher = Arc::new(Publisher::new(config));
    publisher.connect().await.unwrap();
    let queue = TopicPublisher::new(publisher, "queue", JsonArray::<String>::new());
    let items = vec!["a".to_string(), "b".to_string()];
    queue.publish(&["video"], &items).await.unwrap();

    let event = timeout(WAIT, events.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(event.item, items);
    cancel.cancel();
}

#[tokio::test]
async fn connect_twice_is_a_precondition_error() {
    let (config, cancel) = start_hub().await;
    let publisher = Publisher::new(config.clone());
    publisher.connect().await.unwrap();
    assert!(matches!(
        publisher.connect().await,
        Err(BusError::Precondition(_))
    ));

    let subscriber = Subscriber::new(config, vec![], TopicFilter::all());
    subscriber.connect().await.unwrap();
    assert!(matches!(
        subscriber.connect().await,
        Err(BusError::Precondition(_))
    ));
    cancel.cancel();
}

#[tokio::test]
async fn calls_before_connect_are_precondition_errors() {
    let config = BusConfig::default();
    let publisher = Publisher::new(config.clone());
    assert!(matches!(
        publisher.disconnect().await,
        Err(BusError::Precondition(_))
    ));
    assert!(matches!(
        publisher.send_str("chat:a", vec![Bytes::from_static(b"x")]).await,
        Err(BusError::Precondition(_))
    ));

    let subscriber = Subscriber::new(config, vec![], TopicFilter::all());
    assert!(matches!(
        subscriber.disconnect().await,
        Err(BusError::Precondition(_))
    ));
    assert!(matches!(subscriber.stream(), Err(BusError::Precondition(_))));
    assert!(matches!(
        subscriber.unsubscribe("chat").await,
        Err(BusError::Precondition(_))
    ));
}

#[tokio::test]
async fn unsubscribed_prefix_is_no_longer_routed() {
    let (config, cancel) = start_hub().await;
    let subscriber = Subscriber::new(
        config.clone(),
        vec!["cheer".into(), "follow".into()],
        TopicFilter::all(),
    );
    subscriber.connect().await.unwrap();
    let mut stream = subscriber.stream().unwrap();
    subscriber.unsubscribe("cheer").await.unwrap();

    let publisher = Publisher::new(config);
    publisher.connect().await.unwrap();
    publisher.send_str("cheer:user42", vec![]).await.unwrap();
    publisher.send_str("follow:user42", vec![]).await.unwrap();

    let message = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(message.topic.as_str(), "follow:user42");

    subscriber.disconnect().await.unwrap();
    cancel.cancel();
}

#[tokio::test]
async fn hub_shutdown_ends_subscriber_streams() {
    let (config, cancel) = start_hub().await;
    let subscriber = Subscriber::new(config, vec![], TopicFilter::all());
    subscriber.connect().await.unwrap();
    let mut stream = subscriber.stream().unwrap();

    cancel.cancel();
    assert!(timeout(WAIT, stream.next()).await.unwrap().is_none());
    subscriber.disconnect().await.unwrap();
}

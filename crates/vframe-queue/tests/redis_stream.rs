//! Redis Streams integration tests.

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use vframe_models::UploadEvent;
use vframe_queue::{QueueConfig, UploadStream};

fn test_stream(redelivery_delay: Duration, max_deliveries: u32) -> UploadStream {
    dotenvy::dotenv().ok();

    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let base = QueueConfig::from_env();
    let config = QueueConfig {
        stream_name: format!("test:upload:{}", suffix),
        dlq_stream_name: format!("test:upload:{}:dlq", suffix),
        redelivery_delay,
        max_deliveries,
        block: Duration::from_millis(100),
        ..base
    };
    UploadStream::new(config).expect("Failed to create stream")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_init_is_idempotent() {
    let stream = test_stream(Duration::from_secs(30), 5);
    stream.init().await.expect("first init");
    stream.init().await.expect("second init");
    assert_eq!(stream.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publish_fetch_ack() {
    let stream = test_stream(Duration::from_secs(30), 5);
    stream.init().await.unwrap();

    stream.publish(&UploadEvent::new(7, "clip.mp4")).await.unwrap();

    let deliveries = stream.fetch(&HashSet::new()).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].attempt, 1);
    let event = UploadEvent::decode(&deliveries[0].payload).unwrap();
    assert_eq!(event.video_id, 7);

    stream.ack(&deliveries[0].id).await.unwrap();
    assert_eq!(stream.len().await.unwrap(), 0);
    assert!(stream.fetch(&HashSet::new()).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_nak_redelivers_after_delay() {
    let stream = test_stream(Duration::from_millis(200), 5);
    stream.init().await.unwrap();
    stream.publish(&UploadEvent::new(8, "clip.mp4")).await.unwrap();

    let first = stream.fetch(&HashSet::new()).await.unwrap();
    stream.nak(&first[0].id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let again = stream.fetch(&HashSet::new()).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].id, first[0].id);
    assert_eq!(again[0].attempt, 2);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_in_flight_entries_are_not_reclaimed() {
    let stream = test_stream(Duration::from_millis(100), 5);
    stream.init().await.unwrap();
    stream.publish(&UploadEvent::new(9, "clip.mp4")).await.unwrap();

    let first = stream.fetch(&HashSet::new()).await.unwrap();
    let in_flight: HashSet<String> = first.iter().map(|d| d.id.clone()).collect();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(stream.fetch(&in_flight).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_exhausted_entry_moves_to_dlq() {
    let stream = test_stream(Duration::from_millis(100), 1);
    stream.init().await.unwrap();
    stream.publish(&UploadEvent::new(10, "clip.mp4")).await.unwrap();

    let first = stream.fetch(&HashSet::new()).await.unwrap();
    stream.nak(&first[0].id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(stream.fetch(&HashSet::new()).await.unwrap().is_empty());
    assert_eq!(stream.dlq_len().await.unwrap(), 1);
    assert_eq!(stream.len().await.unwrap(), 0);
}

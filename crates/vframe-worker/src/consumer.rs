//! Upload event consumer.
//!
//! Reads upload events from the durable subscription and hands each one to
//! the job processor. Successful processing acks the event; a processing
//! error naks it so the broker redelivers it later. Payloads that cannot be
//! decoded are logged and left unacknowledged.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use vframe_models::UploadEvent;
use vframe_queue::Delivery;

use crate::error::WorkerResult;
use crate::ports::{JobProcessor, MessageSource};
use crate::retry::ErrorThrottle;
use crate::shutdown::{is_shutdown, wait_for_shutdown};

/// Pause after a failed fetch.
const FETCH_BACKOFF: Duration = Duration::from_secs(5);

/// Pause while every handler slot is busy.
const BUSY_BACKOFF: Duration = Duration::from_millis(100);

/// What happened to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Naked,
    /// Undecodable payload, neither acked nor naked.
    Dropped,
}

pub struct EventConsumer {
    source: Arc<dyn MessageSource>,
    processor: Arc<dyn JobProcessor>,
    max_concurrent: usize,
    shutdown_timeout: Duration,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl EventConsumer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        processor: Arc<dyn JobProcessor>,
        max_concurrent: usize,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            source,
            processor,
            max_concurrent: max_concurrent.max(1),
            shutdown_timeout,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Establish the durable subscription.
    ///
    /// An error here is not fatal for the worker: it can keep running on
    /// the polling fallback alone.
    pub async fn subscribe(&self) -> WorkerResult<()> {
        self.source.subscribe().await?;
        info!("Subscribed to upload events");
        Ok(())
    }

    /// Decode, process and settle a single delivery.
    pub async fn handle(&self, delivery: &Delivery) -> Disposition {
        dispatch(self.source.as_ref(), self.processor.as_ref(), delivery).await
    }

    /// Consume until shutdown, then wait up to `shutdown_timeout` for
    /// in-flight handlers.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting event consumer with {} concurrent handlers",
            self.max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut fetch_errors = ErrorThrottle::new(3);

        while !is_shutdown(&shutdown) {
            if semaphore.available_permits() == 0 {
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => {}
                    _ = tokio::time::sleep(BUSY_BACKOFF) => {}
                }
                continue;
            }

            let skip = self.in_flight_ids();
            let fetched = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                fetched = self.source.fetch(&skip) => fetched,
            };

            let deliveries = match fetched {
                Ok(deliveries) => {
                    fetch_errors.reset();
                    deliveries
                }
                Err(e) => {
                    if fetch_errors.should_log() {
                        error!("Error fetching upload events: {}", e);
                    }
                    tokio::select! {
                        _ = wait_for_shutdown(&mut shutdown) => {}
                        _ = tokio::time::sleep(FETCH_BACKOFF) => {}
                    }
                    continue;
                }
            };

            if !deliveries.is_empty() {
                debug!("Fetched {} upload events", deliveries.len());
            }

            for delivery in deliveries {
                let permit = tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown) => break,
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                self.spawn_handler(delivery, permit);
            }
        }

        info!("Event consumer stopping, waiting for in-flight handlers");
        let drained = tokio::time::timeout(
            self.shutdown_timeout,
            semaphore.acquire_many(self.max_concurrent as u32),
        )
        .await;
        if drained.is_err() {
            warn!(
                "Handlers still running after {:?}, their events will be redelivered",
                self.shutdown_timeout
            );
        }
        info!("Event consumer stopped");
    }

    fn in_flight_ids(&self) -> HashSet<String> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn spawn_handler(&self, delivery: Delivery, permit: tokio::sync::OwnedSemaphorePermit) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(delivery.id.clone());

        let source = Arc::clone(&self.source);
        let processor = Arc::clone(&self.processor);
        let in_flight = Arc::clone(&self.in_flight);

        tokio::spawn(async move {
            let _permit = permit;
            dispatch(source.as_ref(), processor.as_ref(), &delivery).await;
            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&delivery.id);
        });
    }
}

async fn dispatch(
    source: &dyn MessageSource,
    processor: &dyn JobProcessor,
    delivery: &Delivery,
) -> Disposition {
    let event = match UploadEvent::decode(&delivery.payload) {
        Ok(event) => event,
        Err(e) => {
            error!(message_id = %delivery.id, "Failed to decode upload event: {}", e);
            return Disposition::Dropped;
        }
    };

    info!(
        video_id = event.video_id,
        filename = %event.filename,
        attempt = delivery.attempt,
        "Received upload event"
    );

    match processor.process(event.job_id()).await {
        Ok(()) => {
            if let Err(e) = source.ack(&delivery.id).await {
                error!(message_id = %delivery.id, "Failed to ack upload event: {}", e);
            }
            Disposition::Acked
        }
        Err(e) => {
            if e.is_not_found() {
                warn!(video_id = event.video_id, "Upload event for unknown job: {}", e);
            } else {
                error!(video_id = event.video_id, "Error processing upload event: {}", e);
            }
            if let Err(e) = source.nak(&delivery.id).await {
                error!(message_id = %delivery.id, "Failed to nak upload event: {}", e);
            }
            Disposition::Naked
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use crate::ports::{MockJobProcessor, MockMessageSource};
    use crate::testing::{FakeArchiver, FakeExtractor, Harness, QueueSource};
    use mockall::predicate::eq;
    use vframe_models::{Job, JobId, JobStatus};

    fn delivery(payload: &[u8]) -> Delivery {
        Delivery {
            id: "1-0".to_string(),
            payload: payload.to_vec(),
            attempt: 1,
        }
    }

    fn consumer(source: MockMessageSource, processor: MockJobProcessor) -> EventConsumer {
        EventConsumer::new(
            Arc::new(source),
            Arc::new(processor),
            2,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_success_acks() {
        let mut source = MockMessageSource::new();
        source.expect_ack().withf(|id| id == "1-0").times(1).returning(|_| Ok(()));
        source.expect_nak().never();
        let mut processor = MockJobProcessor::new();
        processor
            .expect_process()
            .with(eq(JobId(5)))
            .times(1)
            .returning(|_| Ok(()));

        let disposition = consumer(source, processor)
            .handle(&delivery(br#"{"video_id":5,"filename":"clip.mp4"}"#))
            .await;

        assert_eq!(disposition, Disposition::Acked);
    }

    #[tokio::test]
    async fn test_failure_naks() {
        let mut source = MockMessageSource::new();
        source.expect_ack().never();
        source.expect_nak().withf(|id| id == "1-0").times(1).returning(|_| Ok(()));
        let mut processor = MockJobProcessor::new();
        processor
            .expect_process()
            .returning(|_| Err(WorkerError::processing_failed("ffmpeg error")));

        let disposition = consumer(source, processor)
            .handle(&delivery(br#"{"video_id":5,"filename":"clip.mp4"}"#))
            .await;

        assert_eq!(disposition, Disposition::Naked);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_neither_acked_nor_naked() {
        let mut source = MockMessageSource::new();
        source.expect_ack().never();
        source.expect_nak().never();
        let mut processor = MockJobProcessor::new();
        processor.expect_process().never();

        let disposition = consumer(source, processor)
            .handle(&delivery(b"{not json"))
            .await;

        assert_eq!(disposition, Disposition::Dropped);
    }

    #[tokio::test]
    async fn test_ack_failure_does_not_nak() {
        let mut source = MockMessageSource::new();
        source
            .expect_ack()
            .returning(|_| Err(WorkerError::subscription_failed("connection reset")));
        source.expect_nak().never();
        let mut processor = MockJobProcessor::new();
        processor.expect_process().returning(|_| Ok(()));

        let disposition = consumer(source, processor)
            .handle(&delivery(br#"{"video_id":5,"filename":"clip.mp4"}"#))
            .await;

        assert_eq!(disposition, Disposition::Acked);
    }

    #[tokio::test]
    async fn test_subscription_failure_is_reported() {
        let mut source = MockMessageSource::new();
        source
            .expect_subscribe()
            .returning(|| Err(WorkerError::subscription_failed("broker unreachable")));

        let err = consumer(source, MockJobProcessor::new())
            .subscribe()
            .await
            .unwrap_err();

        assert!(err.to_string().contains("broker unreachable"));
    }

    #[tokio::test]
    async fn test_run_processes_events_until_shutdown() {
        let h = Harness::new(
            vec![Job::new(1, 1, "video.mp4"), Job::new(2, 1, "other.mp4")],
            FakeExtractor::frames(2).with_delay(Duration::from_millis(20)),
            FakeArchiver::new(),
        );
        let source = Arc::new(QueueSource::default());
        source.push("1-0", br#"{"video_id":1,"filename":"video.mp4"}"#);
        source.push("2-0", br#"{"video_id":2,"filename":"other.mp4"}"#);
        source.push("3-0", b"garbage");
        source.push("4-0", br#"{"video_id":99,"filename":"gone.mp4"}"#);

        let consumer = EventConsumer::new(
            source.clone(),
            h.orchestrator.clone(),
            2,
            Duration::from_secs(5),
        );
        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(async move { consumer.run(rx).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        running.await.unwrap();

        let mut acked = source.acked();
        acked.sort();
        assert_eq!(acked, vec!["1-0".to_string(), "2-0".to_string()]);
        assert_eq!(source.naked(), vec!["4-0".to_string()]);
        assert_eq!(h.store.job(JobId(1)).unwrap().status, JobStatus::Completed);
        assert_eq!(h.store.job(JobId(2)).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_handler() {
        let h = Harness::new(
            vec![Job::new(1, 1, "video.mp4")],
            FakeExtractor::frames(1).with_delay(Duration::from_millis(150)),
            FakeArchiver::new(),
        );
        let source = Arc::new(QueueSource::default());
        source.push("1-0", br#"{"video_id":1,"filename":"video.mp4"}"#);

        let consumer = EventConsumer::new(
            source.clone(),
            h.orchestrator.clone(),
            1,
            Duration::from_secs(5),
        );
        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(async move { consumer.run(rx).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        running.await.unwrap();

        assert_eq!(source.acked(), vec!["1-0".to_string()]);
        assert_eq!(h.store.job(JobId(1)).unwrap().status, JobStatus::Completed);
    }
}

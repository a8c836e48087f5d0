//! Upload event subscription over Redis Streams.
//!
//! Events live on a single stream read through a durable consumer group.
//! Delivery is at-least-once: an entry stays in the group's pending list
//! until it is acknowledged, and entries left idle longer than the
//! redelivery delay are claimed again on the next fetch.

use std::collections::HashSet;
use std::time::Duration;

use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamRangeReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use vframe_models::UploadEvent;

use crate::error::{QueueError, QueueResult};

const PAYLOAD_FIELD: &str = "payload";

/// Stream configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream carrying upload events
    pub stream_name: String,
    /// Durable consumer group
    pub consumer_group: String,
    /// Consumer name inside the group
    pub consumer_name: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Deliveries before an entry is dead-lettered
    pub max_deliveries: u32,
    /// Idle time before an unacknowledged entry is redelivered
    pub redelivery_delay: Duration,
    /// How long a read blocks waiting for new entries
    pub block: Duration,
    /// Entries fetched per read
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "upload".to_string(),
            consumer_group: "worker".to_string(),
            consumer_name: "worker".to_string(),
            dlq_stream_name: "upload:dlq".to_string(),
            max_deliveries: 5,
            redelivery_delay: Duration::from_secs(30),
            block: Duration::from_millis(1000),
            batch_size: 10,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("UPLOAD_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("UPLOAD_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            consumer_name: std::env::var("UPLOAD_CONSUMER_NAME").unwrap_or(defaults.consumer_name),
            dlq_stream_name: std::env::var("UPLOAD_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_deliveries: std::env::var("UPLOAD_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_deliveries),
            redelivery_delay: std::env::var("UPLOAD_REDELIVERY_DELAY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.redelivery_delay),
            block: std::env::var("UPLOAD_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.block),
            batch_size: std::env::var("UPLOAD_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.batch_size),
        }
    }
}

/// One entry handed to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stream entry ID, used to ack or nak
    pub id: String,
    /// Raw event bytes
    pub payload: Vec<u8>,
    /// 1 for the first delivery
    pub attempt: u32,
}

impl Delivery {
    fn from_entry(entry: &StreamId, attempt: u32) -> Self {
        Self {
            id: entry.id.clone(),
            payload: entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default(),
            attempt,
        }
    }
}

/// Client for the upload stream.
pub struct UploadStream {
    client: redis::Client,
    config: QueueConfig,
}

impl UploadStream {
    /// Create a new stream client. Does not touch the network.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Create the durable consumer group (and the stream) if missing.
    ///
    /// The group starts at the beginning of the stream so events published
    /// before the first worker started are still delivered.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self
            .conn()
            .await
            .map_err(|e| QueueError::subscribe_failed(e.to_string()))?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => info!(
                stream = %self.config.stream_name,
                group = %self.config.consumer_group,
                "Created consumer group"
            ),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::subscribe_failed(e.to_string())),
        }

        Ok(())
    }

    /// Append an upload event to the stream.
    pub async fn publish(&self, event: &UploadEvent) -> QueueResult<String> {
        let mut conn = self.conn().await?;
        let payload = event.encode()?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::PublishFailed(e.to_string()))?;

        debug!(video_id = event.video_id, message_id = %message_id, "Published upload event");
        Ok(message_id)
    }

    /// Fetch the next batch of deliveries.
    ///
    /// Entries idle past the redelivery delay come first. Entries whose IDs
    /// are in `in_flight` are left alone, and entries that already reached
    /// `max_deliveries` are moved to the dead letter stream. New entries are
    /// read (blocking up to `block`) only when nothing was redelivered.
    pub async fn fetch(&self, in_flight: &HashSet<String>) -> QueueResult<Vec<Delivery>> {
        let redelivered = self.reclaim(in_flight).await?;
        if !redelivered.is_empty() {
            return Ok(redelivered);
        }
        self.read_new().await
    }

    async fn read_new(&self) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;

        let reply: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(self.config.batch_size)
            .arg("BLOCK")
            .arg(self.config.block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .keys
            .iter()
            .flat_map(|key| key.ids.iter())
            .map(|entry| Delivery::from_entry(entry, 1))
            .collect())
    }

    async fn reclaim(&self, in_flight: &HashSet<String>) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;
        let min_idle_ms = self.config.redelivery_delay.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(self.config.batch_size)
            .query_async(&mut conn)
            .await?;

        let mut claimable = Vec::new();
        for entry in pending.ids {
            if in_flight.contains(&entry.id) {
                continue;
            }
            if entry.times_delivered >= self.config.max_deliveries as usize {
                let reason = format!("delivered {} times without ack", entry.times_delivered);
                self.dead_letter(&entry.id, &reason).await?;
                continue;
            }
            claimable.push((entry.id, entry.times_delivered));
        }

        if claimable.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(min_idle_ms);
        for (id, _) in &claimable {
            cmd.arg(id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        let deliveries: Vec<Delivery> = claimed
            .ids
            .iter()
            .map(|entry| {
                let previous = claimable
                    .iter()
                    .find(|(id, _)| *id == entry.id)
                    .map(|(_, n)| *n)
                    .unwrap_or(0);
                Delivery::from_entry(entry, previous as u32 + 1)
            })
            .collect();

        if !deliveries.is_empty() {
            info!(count = deliveries.len(), "Reclaimed idle upload events");
        }
        Ok(deliveries)
    }

    /// Acknowledge an entry and drop it from the stream.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged upload event: {}", message_id);
        Ok(())
    }

    /// Negatively acknowledge an entry.
    ///
    /// The entry stays pending and its idle timer restarts, so it is
    /// redelivered once the redelivery delay has passed.
    pub async fn nak(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Nacked upload event: {}", message_id);
        Ok(())
    }

    /// Copy an entry to the dead letter stream and acknowledge the original.
    pub async fn dead_letter(&self, message_id: &str, error: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let range: StreamRangeReply = conn
            .xrange(&self.config.stream_name, message_id, message_id)
            .await?;
        let payload = range
            .ids
            .first()
            .and_then(|entry| entry.get::<Vec<u8>>(PAYLOAD_FIELD))
            .unwrap_or_default();

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!(message_id, error, "Moved upload event to DLQ");
        Ok(())
    }

    /// Stream length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Dead letter stream length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }
}

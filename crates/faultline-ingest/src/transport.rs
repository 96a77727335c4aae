//! `RawEvent` transport across the queue boundary.
//!
//! Events travel as zlib-compressed JSON. Delivery is at-least-once: a popped
//! event comes with a [`Delivery`] handle, and the message is only removed
//! from the queue when the handle is acknowledged.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use faultline_queue::{Message, MessageId, QueueBackend};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::TransportError;
use crate::event::RawEvent;

/// Publishes and consumes [`RawEvent`]s on a named queue.
#[derive(Clone)]
pub struct EventQueue {
    backend: Arc<dyn QueueBackend>,
    queue: String,
    dead_letter: String,
    compression: Compression,
    max_attempts: u32,
    visibility_timeout: Duration,
}

impl EventQueue {
    /// Create a transport over `backend` using the queue settings in `config`.
    #[must_use]
    pub fn new(backend: Arc<dyn QueueBackend>, config: &QueueConfig) -> Self {
        Self {
            backend,
            queue: config.name.clone(),
            dead_letter: config.dead_letter_name(),
            compression: Compression::new(config.compression_level.min(9)),
            max_attempts: config.max_attempts.max(1),
            visibility_timeout: config.visibility_timeout(),
        }
    }

    /// Name of the queue events are published to.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Name of the dead-letter queue.
    #[must_use]
    pub fn dead_letter_name(&self) -> &str {
        &self.dead_letter
    }

    /// Compress and publish an event.
    pub async fn push_raw_event(&self, event: &RawEvent) -> Result<MessageId, TransportError> {
        let payload = encode(event, self.compression)?;
        let id = self.backend.publish(&self.queue, &payload).await?;
        debug!(
            queue = %self.queue,
            message_id = %id,
            event_id = %event.event_id,
            bytes = payload.len(),
            "Published raw event"
        );
        Ok(id)
    }

    /// Receive the next event.
    ///
    /// Returns `None` when the queue has nothing visible. Messages that have
    /// exhausted their delivery attempts, or that cannot be decoded, are moved
    /// to the dead-letter queue and skipped.
    pub async fn pop_raw_event(&self) -> Result<Option<Delivery>, TransportError> {
        loop {
            let Some(message) = self
                .backend
                .receive(&self.queue, self.visibility_timeout)
                .await?
            else {
                return Ok(None);
            };

            if message.attempt > self.max_attempts {
                warn!(
                    queue = %self.queue,
                    message_id = %message.id,
                    attempt = message.attempt,
                    max_attempts = self.max_attempts,
                    "Delivery attempts exhausted, dead-lettering"
                );
                self.dead_letter(&message).await?;
                continue;
            }

            match decode(&message.payload) {
                Ok(event) => {
                    return Ok(Some(Delivery {
                        event,
                        message_id: message.id,
                        attempt: message.attempt,
                        backend: Arc::clone(&self.backend),
                        queue: self.queue.clone(),
                    }));
                }
                Err(e) => {
                    warn!(
                        queue = %self.queue,
                        message_id = %message.id,
                        error = %e,
                        "Undecodable message, dead-lettering"
                    );
                    self.dead_letter(&message).await?;
                }
            }
        }
    }

    /// Number of messages in the dead-letter queue.
    pub async fn dead_letter_depth(&self) -> Result<usize, TransportError> {
        Ok(self.backend.depth(&self.dead_letter).await?)
    }

    async fn dead_letter(&self, message: &Message) -> Result<(), TransportError> {
        self.backend
            .dead_letter(&self.queue, message.id, &self.dead_letter)
            .await?;
        Ok(())
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("queue", &self.queue)
            .field("dead_letter", &self.dead_letter)
            .field("compression", &self.compression.level())
            .field("max_attempts", &self.max_attempts)
            .field("visibility_timeout", &self.visibility_timeout)
            .finish_non_exhaustive()
    }
}

/// A received event that has not been acknowledged yet.
///
/// Dropping the handle without calling [`ack`](Self::ack) or
/// [`nack`](Self::nack) leaves the message to reappear once its visibility
/// timeout expires.
pub struct Delivery {
    event: RawEvent,
    message_id: MessageId,
    attempt: u32,
    backend: Arc<dyn QueueBackend>,
    queue: String,
}

impl Delivery {
    #[must_use]
    pub fn event(&self) -> &RawEvent {
        &self.event
    }

    #[must_use]
    pub const fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Delivery attempt, starting at 1.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Remove the message from the queue. Call only after processing succeeded.
    pub async fn ack(self) -> Result<(), TransportError> {
        self.backend.ack(&self.queue, self.message_id).await?;
        Ok(())
    }

    /// Return the message to the queue for immediate redelivery.
    pub async fn nack(self) -> Result<(), TransportError> {
        self.backend.nack(&self.queue, self.message_id).await?;
        Ok(())
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("event_id", &self.event.event_id)
            .field("message_id", &self.message_id)
            .field("attempt", &self.attempt)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

fn encode(event: &RawEvent, level: Compression) -> Result<Vec<u8>, TransportError> {
    let json = serde_json::to_vec(event)?;
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(json.len() / 2), level);
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

fn decode(payload: &[u8]) -> Result<RawEvent, TransportError> {
    let mut json = Vec::new();
    ZlibDecoder::new(payload).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use faultline_queue::MemoryQueue;
    use serde_json::json;

    use super::*;
    use crate::types::{Level, ProjectId};

    fn sample_event() -> RawEvent {
        let mut data = serde_json::Map::new();
        data.insert("sentry.interfaces.Http".to_string(), json!({"url": "/"}));
        RawEvent {
            event_id: "0123456789abcdef0123456789abcdef".to_string(),
            message: "boom".to_string(),
            level: Level::Fatal,
            logger: "root".to_string(),
            server_name: "web-1".to_string(),
            culprit: String::new(),
            platform: "python".to_string(),
            release: String::new(),
            version: "2.0".to_string(),
            project: Some(ProjectId::new(1)),
            datetime: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            checksum: "abc".to_string(),
            time_spent: Some(15),
            tags: BTreeMap::from([("os".to_string(), "linux".to_string())]),
            extra: serde_json::Map::new(),
            data,
        }
    }

    fn transport(backend: Arc<MemoryQueue>, max_attempts: u32) -> EventQueue {
        let config = QueueConfig {
            max_attempts,
            visibility_timeout_secs: 0,
            ..QueueConfig::default()
        };
        EventQueue::new(backend, &config)
    }

    #[tokio::test]
    async fn push_then_pop_yields_same_event() {
        let backend = Arc::new(MemoryQueue::new());
        let queue = transport(backend, 5);
        let event = sample_event();

        queue.push_raw_event(&event).await.unwrap();
        let delivery = queue.pop_raw_event().await.unwrap().unwrap();

        assert_eq!(delivery.event(), &event);
        assert_eq!(delivery.attempt(), 1);
        delivery.ack().await.unwrap();
        assert!(queue.pop_raw_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn payload_is_compressed() {
        let backend = Arc::new(MemoryQueue::new());
        let queue = transport(Arc::clone(&backend), 5);
        let mut event = sample_event();
        event.message = "repeat ".repeat(200);

        queue.push_raw_event(&event).await.unwrap();
        let message = backend
            .receive("events", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        assert!(message.payload.len() < event.message.len());
        assert_eq!(decode(&message.payload).unwrap(), event);
    }

    #[tokio::test]
    async fn nack_redelivers_with_higher_attempt() {
        let backend = Arc::new(MemoryQueue::new());
        let queue = transport(backend, 5);
        queue.push_raw_event(&sample_event()).await.unwrap();

        let first = queue.pop_raw_event().await.unwrap().unwrap();
        first.nack().await.unwrap();

        let second = queue.pop_raw_event().await.unwrap().unwrap();
        assert_eq!(second.attempt(), 2);
    }

    #[tokio::test]
    async fn exhausted_message_is_dead_lettered() {
        let backend = Arc::new(MemoryQueue::new());
        let queue = transport(Arc::clone(&backend), 2);
        queue.push_raw_event(&sample_event()).await.unwrap();

        for _ in 0..2 {
            let delivery = queue.pop_raw_event().await.unwrap().unwrap();
            delivery.nack().await.unwrap();
        }

        assert!(queue.pop_raw_event().await.unwrap().is_none());
        assert_eq!(queue.dead_letter_depth().await.unwrap(), 1);
        assert_eq!(backend.depth("events").await.unwrap(), 0);

        // The parked payload is the original event, ready for inspection
        let parked = backend
            .receive("events.dead", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parked.attempt, 1);
        assert_eq!(decode(&parked.payload).unwrap(), sample_event());
    }

    #[tokio::test]
    async fn undecodable_message_is_dead_lettered() {
        let backend = Arc::new(MemoryQueue::new());
        let queue = transport(Arc::clone(&backend), 5);
        backend.publish("events", b"not zlib").await.unwrap();
        queue.push_raw_event(&sample_event()).await.unwrap();

        let delivery = queue.pop_raw_event().await.unwrap().unwrap();
        assert_eq!(delivery.event().message, "boom");
        assert_eq!(queue.dead_letter_depth().await.unwrap(), 1);
    }
}

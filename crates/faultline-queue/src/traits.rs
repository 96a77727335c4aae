use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::types::{Message, MessageId};

/// A set of named queues with at-least-once delivery.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<MessageId, QueueError>;

    /// Claim the oldest visible message, hiding it for `visibility_timeout`.
    ///
    /// Returns `None` when nothing is visible. Each claim bumps the message's
    /// attempt counter.
    async fn receive(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<Message>, QueueError>;

    /// Delete a message for good.
    async fn ack(&self, queue: &str, id: MessageId) -> Result<(), QueueError>;

    /// Make a claimed message visible again immediately.
    async fn nack(&self, queue: &str, id: MessageId) -> Result<(), QueueError>;

    /// Move a message from `queue` to `dead_queue` in a single step.
    ///
    /// The message keeps its id and payload, becomes visible on `dead_queue`
    /// at once and starts over with no attempts. Afterwards it is no longer
    /// held by `queue`.
    async fn dead_letter(
        &self,
        queue: &str,
        id: MessageId,
        dead_queue: &str,
    ) -> Result<(), QueueError>;

    /// Number of messages held by the queue, claimed or not.
    async fn depth(&self, queue: &str) -> Result<usize, QueueError>;
}

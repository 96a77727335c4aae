//! In-process queue backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::QueueError;
use crate::traits::QueueBackend;
use crate::types::{Message, MessageId};

#[derive(Debug)]
struct Slot {
    queue: String,
    payload: Vec<u8>,
    attempt: u32,
    enqueued_at: DateTime<Utc>,
    visible_at: Instant,
}

/// Every message of every queue, keyed by id so iteration is publication order.
#[derive(Debug, Default)]
struct Slots {
    last_id: i64,
    by_id: BTreeMap<MessageId, Slot>,
}

impl Slots {
    fn held_by(&mut self, queue: &str, id: MessageId) -> Result<&mut Slot, QueueError> {
        self.by_id
            .get_mut(&id)
            .filter(|slot| slot.queue == queue)
            .ok_or_else(|| QueueError::unknown(queue, id))
    }
}

/// In-process queue with visibility timeouts.
///
/// All queues live in one id-ordered table, mirroring the PostgreSQL layout,
/// so moving a message between queues is a field update. Cloning shares the
/// table between handles.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    slots: Arc<Mutex<Slots>>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<MessageId, QueueError> {
        let mut slots = self.slots.lock().await;
        slots.last_id += 1;
        let id = MessageId::new(slots.last_id);

        slots.by_id.insert(
            id,
            Slot {
                queue: queue.to_owned(),
                payload: payload.to_vec(),
                attempt: 0,
                enqueued_at: Utc::now(),
                visible_at: Instant::now(),
            },
        );
        trace!(queue, %id, bytes = payload.len(), "Message published");
        Ok(id)
    }

    async fn receive(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<Message>, QueueError> {
        let mut slots = self.slots.lock().await;
        let now = Instant::now();

        let Some((id, slot)) = slots
            .by_id
            .iter_mut()
            .find(|(_, slot)| slot.queue == queue && slot.visible_at <= now)
        else {
            return Ok(None);
        };

        slot.visible_at = now + visibility_timeout;
        slot.attempt += 1;
        Ok(Some(Message {
            id: *id,
            payload: slot.payload.clone(),
            attempt: slot.attempt,
            enqueued_at: slot.enqueued_at,
        }))
    }

    async fn ack(&self, queue: &str, id: MessageId) -> Result<(), QueueError> {
        let mut slots = self.slots.lock().await;
        slots.held_by(queue, id)?;
        slots.by_id.remove(&id);
        Ok(())
    }

    async fn nack(&self, queue: &str, id: MessageId) -> Result<(), QueueError> {
        let mut slots = self.slots.lock().await;
        slots.held_by(queue, id)?.visible_at = Instant::now();
        Ok(())
    }

    async fn dead_letter(
        &self,
        queue: &str,
        id: MessageId,
        dead_queue: &str,
    ) -> Result<(), QueueError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.held_by(queue, id)?;

        let attempts = slot.attempt;
        slot.queue = dead_queue.to_owned();
        slot.attempt = 0;
        slot.visible_at = Instant::now();

        debug!(from = queue, to = dead_queue, %id, attempts, "Message dead-lettered");
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        let slots = self.slots.lock().await;
        Ok(slots.by_id.values().filter(|slot| slot.queue == queue).count())
    }
}

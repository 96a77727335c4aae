//! Per-event processing: group resolution, event recording, hooks.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{StoreError, WorkerError};
use crate::event::RawEvent;
use crate::store::{Event, EventGroup, EventStore, NewEvent, NewGroup};
use crate::types::GroupStatus;

use super::callbacks::{Callbacks, ProcessedEvent};

/// Outcome of processing one event.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub event: Event,
    pub group: EventGroup,
    pub is_new_group: bool,
    pub is_regression: bool,
    /// Hooks that panicked.
    pub hook_failures: usize,
}

/// Materialises raw events into the store.
#[derive(Clone)]
pub struct EventProcessor {
    store: Arc<dyn EventStore>,
    callbacks: Arc<Callbacks>,
}

impl EventProcessor {
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, callbacks: Arc<Callbacks>) -> Self {
        Self { store, callbacks }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Store one event and count it against its group, then fire hooks.
    ///
    /// The row and the count are written together, so a failed attempt
    /// leaves nothing behind for the redelivery to duplicate.
    ///
    /// On error the message must not be acked, so it is redelivered.
    pub async fn process(&self, raw: &RawEvent) -> Result<ProcessOutcome, WorkerError> {
        let project = raw.project.ok_or_else(|| {
            StoreError::internal(format!("event {} has no project", raw.event_id))
        })?;
        let now = Utc::now();

        let (group, is_new_group) = self
            .store
            .get_or_create_group(&NewGroup::from_raw(raw, project, now))
            .await?;

        let (event, updated) = self
            .store
            .record_event(&NewEvent::from_raw(raw, project, group.id), now)
            .await?;

        let is_regression =
            group.status == GroupStatus::Resolved && updated.status == GroupStatus::Unresolved;
        if is_regression {
            info!(group_id = updated.id, checksum = %updated.checksum, "Group regressed");
        }

        let hook_failures = self.callbacks.fire(&ProcessedEvent {
            event: &event,
            group: &updated,
            is_new_group,
            is_regression,
        });

        debug!(
            event_id = %event.event_id,
            group_id = updated.id,
            times_seen = updated.times_seen,
            new_group = is_new_group,
            "Processed event"
        );

        Ok(ProcessOutcome {
            event,
            group: updated,
            is_new_group,
            is_regression,
            hook_failures,
        })
    }
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

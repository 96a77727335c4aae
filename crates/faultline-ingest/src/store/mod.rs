//! Event group and event storage backends.
//!
//! Groups aggregate every occurrence of one logical error, keyed by
//! `(project, checksum)`. Events are immutable per-occurrence rows that
//! reference their group. The PostgreSQL backend is the production store;
//! the in-memory backend is used for tests and single-process runs.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::event::RawEvent;
use crate::types::{GroupStatus, Level, ProjectId};

/// An aggregated error: every event with the same project and checksum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventGroup {
    pub id: i64,
    pub project: ProjectId,
    pub logger: String,
    pub level: Level,
    pub message: String,
    pub culprit: String,
    pub checksum: String,
    pub platform: String,
    pub status: GroupStatus,
    /// Number of recorded occurrences. Never decreases.
    pub times_seen: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// When the group last became unresolved.
    pub active_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Sum of reported `time_spent` values, in milliseconds.
    pub time_spent_total: i64,
    /// Number of occurrences that reported `time_spent`.
    pub time_spent_count: i64,
    pub data: Value,
}

impl EventGroup {
    /// Mean reported time spent, if any occurrence reported one.
    #[must_use]
    pub fn avg_time_spent(&self) -> Option<f64> {
        (self.time_spent_count > 0)
            .then(|| self.time_spent_total as f64 / self.time_spent_count as f64)
    }
}

/// Values for a group that may not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGroup {
    pub project: ProjectId,
    pub logger: String,
    pub level: Level,
    pub message: String,
    pub culprit: String,
    pub checksum: String,
    pub platform: String,
    pub data: Value,
    pub seen_at: DateTime<Utc>,
}

impl NewGroup {
    /// Group template for the first occurrence of `event`.
    #[must_use]
    pub fn from_raw(event: &RawEvent, project: ProjectId, seen_at: DateTime<Utc>) -> Self {
        Self {
            project,
            logger: event.logger.clone(),
            level: event.level,
            message: event.message.clone(),
            culprit: event.culprit.clone(),
            checksum: event.checksum.clone(),
            platform: event.platform.clone(),
            data: Value::Object(event.data.clone()),
            seen_at,
        }
    }
}

/// A single stored occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub event_id: String,
    pub project: ProjectId,
    pub group_id: i64,
    pub message: String,
    pub level: Level,
    pub logger: String,
    pub server_name: String,
    pub culprit: String,
    pub platform: String,
    pub checksum: String,
    pub time_spent: Option<i64>,
    pub datetime: DateTime<Utc>,
    pub data: Value,
}

/// Values for an event row about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_id: String,
    pub project: ProjectId,
    pub group_id: i64,
    pub message: String,
    pub level: Level,
    pub logger: String,
    pub server_name: String,
    pub culprit: String,
    pub platform: String,
    pub checksum: String,
    pub time_spent: Option<i64>,
    pub datetime: DateTime<Utc>,
    pub data: Value,
}

impl NewEvent {
    /// Event row for `event` within `group_id`.
    #[must_use]
    pub fn from_raw(event: &RawEvent, project: ProjectId, group_id: i64) -> Self {
        Self {
            event_id: event.event_id.clone(),
            project,
            group_id,
            message: event.message.clone(),
            level: event.level,
            logger: event.logger.clone(),
            server_name: event.server_name.clone(),
            culprit: event.culprit.clone(),
            platform: event.platform.clone(),
            checksum: event.checksum.clone(),
            time_spent: event.time_spent,
            datetime: event.datetime,
            data: event.snapshot(),
        }
    }

    fn into_event(self, id: i64) -> Event {
        Event {
            id,
            event_id: self.event_id,
            project: self.project,
            group_id: self.group_id,
            message: self.message,
            level: self.level,
            logger: self.logger,
            server_name: self.server_name,
            culprit: self.culprit,
            platform: self.platform,
            checksum: self.checksum,
            time_spent: self.time_spent,
            datetime: self.datetime,
            data: self.data,
        }
    }
}

/// Backend for storing groups and events.
///
/// Implementations must make [`get_or_create_group`](Self::get_or_create_group)
/// safe under concurrent callers with the same key, and
/// [`record_event`](Self::record_event) all-or-nothing, so that a group's
/// `times_seen` always equals the number of events referencing it.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Return the group for `(project, checksum)`, creating it if missing.
    ///
    /// The flag is `true` when this call created the group.
    async fn get_or_create_group(&self, group: &NewGroup) -> StoreResult<(EventGroup, bool)>;

    /// Insert an event row and count it against its group, atomically.
    ///
    /// The count increments `times_seen`, sets `last_seen`, folds the
    /// event's `time_spent` into the aggregates and reopens a resolved group.
    /// On error neither the row nor the count is kept. Returns the stored
    /// event and the updated group.
    async fn record_event(
        &self,
        event: &NewEvent,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<(Event, EventGroup)>;

    /// Look up a group by its key.
    async fn get_group(&self, project: ProjectId, checksum: &str)
        -> StoreResult<Option<EventGroup>>;

    async fn get_group_by_id(&self, group_id: i64) -> StoreResult<Option<EventGroup>>;

    /// Events of a group, oldest first.
    async fn list_events(&self, group_id: i64) -> StoreResult<Vec<Event>>;

    /// Change a group's status.
    ///
    /// Resolving stamps `resolved_at`; unresolving clears it and stamps
    /// `active_at`.
    async fn set_group_status(&self, group_id: i64, status: GroupStatus)
        -> StoreResult<EventGroup>;

    async fn resolve_group(&self, group_id: i64) -> StoreResult<EventGroup> {
        self.set_group_status(group_id, GroupStatus::Resolved).await
    }

    async fn mute_group(&self, group_id: i64) -> StoreResult<EventGroup> {
        self.set_group_status(group_id, GroupStatus::Muted).await
    }

    async fn unresolve_group(&self, group_id: i64) -> StoreResult<EventGroup> {
        self.set_group_status(group_id, GroupStatus::Unresolved).await
    }
}

/// Build the event store described by `config`.
pub async fn connect(config: &StoreConfig) -> StoreResult<Arc<dyn EventStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "postgres")]
        StoreConfig::Postgres {
            url,
            max_connections,
        } => Ok(Arc::new(PostgresStore::new(url, *max_connections).await?)),
        #[cfg(not(feature = "postgres"))]
        StoreConfig::Postgres { .. } => Err(crate::error::StoreError::internal(
            "postgres store requested but the postgres feature is disabled",
        )),
    }
}

/// Apply a status change to a group in place.
pub(crate) fn apply_status(group: &mut EventGroup, status: GroupStatus, now: DateTime<Utc>) {
    match status {
        GroupStatus::Resolved => group.resolved_at = Some(now),
        GroupStatus::Unresolved => {
            group.resolved_at = None;
            group.active_at = now;
        }
        GroupStatus::Muted => {}
    }
    group.status = status;
}

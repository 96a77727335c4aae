//! In-memory event store for testing.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};
use crate::types::{GroupStatus, ProjectId};

use super::{apply_status, Event, EventGroup, EventStore, NewEvent, NewGroup};

#[derive(Debug, Default)]
struct State {
    groups: HashMap<i64, EventGroup>,
    by_key: HashMap<(ProjectId, String), i64>,
    events: Vec<Event>,
    next_group_id: i64,
    next_event_id: i64,
}

/// In-memory event store for testing.
///
/// This implementation is not suitable for production use as data is lost
/// when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored groups.
    pub fn group_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.groups.len())
    }

    /// Number of stored events across all groups.
    pub fn event_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.events.len())
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::internal("lock poisoned"))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::internal("lock poisoned"))
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn get_or_create_group(&self, group: &NewGroup) -> StoreResult<(EventGroup, bool)> {
        let mut state = self.write()?;

        let key = (group.project, group.checksum.clone());
        if let Some(existing) = state.by_key.get(&key).and_then(|id| state.groups.get(id)) {
            return Ok((existing.clone(), false));
        }

        state.next_group_id += 1;
        let id = state.next_group_id;
        let created = EventGroup {
            id,
            project: group.project,
            logger: group.logger.clone(),
            level: group.level,
            message: group.message.clone(),
            culprit: group.culprit.clone(),
            checksum: group.checksum.clone(),
            platform: group.platform.clone(),
            status: GroupStatus::Unresolved,
            times_seen: 0,
            first_seen: group.seen_at,
            last_seen: group.seen_at,
            active_at: group.seen_at,
            resolved_at: None,
            time_spent_total: 0,
            time_spent_count: 0,
            data: group.data.clone(),
        };

        state.by_key.insert(key, id);
        state.groups.insert(id, created.clone());
        Ok((created, true))
    }

    async fn record_event(
        &self,
        event: &NewEvent,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<(Event, EventGroup)> {
        let mut state = self.write()?;
        let State {
            groups,
            events,
            next_event_id,
            ..
        } = &mut *state;

        let group = groups
            .get_mut(&event.group_id)
            .ok_or(StoreError::GroupNotFound(event.group_id))?;

        // Everything fallible runs before the first write
        let (time_spent_total, time_spent_count) = match event.time_spent {
            Some(spent) => (
                group.time_spent_total.checked_add(spent).ok_or_else(|| {
                    StoreError::internal(format!(
                        "time_spent total overflows for group {}",
                        group.id
                    ))
                })?,
                group.time_spent_count + 1,
            ),
            None => (group.time_spent_total, group.time_spent_count),
        };

        *next_event_id += 1;
        let stored = event.clone().into_event(*next_event_id);
        events.push(stored.clone());

        group.times_seen += 1;
        group.last_seen = seen_at;
        group.time_spent_total = time_spent_total;
        group.time_spent_count = time_spent_count;
        if group.status == GroupStatus::Resolved {
            apply_status(group, GroupStatus::Unresolved, seen_at);
        }

        Ok((stored, group.clone()))
    }

    async fn get_group(
        &self,
        project: ProjectId,
        checksum: &str,
    ) -> StoreResult<Option<EventGroup>> {
        let state = self.read()?;
        Ok(state
            .by_key
            .get(&(project, checksum.to_owned()))
            .and_then(|id| state.groups.get(id))
            .cloned())
    }

    async fn get_group_by_id(&self, group_id: i64) -> StoreResult<Option<EventGroup>> {
        Ok(self.read()?.groups.get(&group_id).cloned())
    }

    async fn list_events(&self, group_id: i64) -> StoreResult<Vec<Event>> {
        Ok(self
            .read()?
            .events
            .iter()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn set_group_status(
        &self,
        group_id: i64,
        status: GroupStatus,
    ) -> StoreResult<EventGroup> {
        let mut state = self.write()?;

        let group = state
            .groups
            .get_mut(&group_id)
            .ok_or(StoreError::GroupNotFound(group_id))?;

        apply_status(group, status, Utc::now());
        Ok(group.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::types::Level;

    fn new_group(project: i64, checksum: &str) -> NewGroup {
        NewGroup {
            project: ProjectId::new(project),
            logger: "root".to_owned(),
            level: Level::Error,
            message: "boom".to_owned(),
            culprit: String::new(),
            checksum: checksum.to_owned(),
            platform: "python".to_owned(),
            data: json!({}),
            seen_at: Utc::now(),
        }
    }

    fn new_event(group_id: i64, time_spent: Option<i64>) -> NewEvent {
        NewEvent {
            event_id: "0123456789abcdef0123456789abcdef".to_owned(),
            project: ProjectId::new(1),
            group_id,
            message: "boom".to_owned(),
            level: Level::Error,
            logger: "root".to_owned(),
            server_name: String::new(),
            culprit: String::new(),
            platform: "python".to_owned(),
            checksum: "abc".to_owned(),
            time_spent,
            datetime: Utc::now(),
            data: json!({}),
        }
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_per_key() {
        let store = MemoryStore::new();

        let (first, created) = store.get_or_create_group(&new_group(1, "abc")).await.unwrap();
        assert!(created);
        assert_eq!(first.times_seen, 0);
        assert_eq!(first.status, GroupStatus::Unresolved);

        let (again, created) = store.get_or_create_group(&new_group(1, "abc")).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, first.id);

        let (other, created) = store.get_or_create_group(&new_group(2, "abc")).await.unwrap();
        assert!(created);
        assert_ne!(other.id, first.id);
        assert_eq!(store.group_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn record_event_stores_row_and_counts_it() {
        let store = MemoryStore::new();
        let (group, _) = store.get_or_create_group(&new_group(1, "abc")).await.unwrap();

        let seen = Utc::now();
        let (first, _) = store.record_event(&new_event(group.id, Some(100)), seen).await.unwrap();
        let (second, updated) = store.record_event(&new_event(group.id, None), seen).await.unwrap();

        assert!(first.id < second.id);
        assert_eq!(second.group_id, group.id);
        assert_eq!(updated.times_seen, 2);
        assert_eq!(updated.last_seen, seen);
        assert_eq!(updated.time_spent_total, 100);
        assert_eq!(updated.time_spent_count, 1);
        assert_eq!(updated.avg_time_spent(), Some(100.0));
    }

    #[tokio::test]
    async fn failed_record_keeps_neither_row_nor_count() {
        let store = MemoryStore::new();
        let (group, _) = store.get_or_create_group(&new_group(1, "abc")).await.unwrap();
        store
            .record_event(&new_event(group.id, Some(i64::MAX)), Utc::now())
            .await
            .unwrap();

        let result = store.record_event(&new_event(group.id, Some(1)), Utc::now()).await;
        assert!(matches!(result, Err(StoreError::Internal(_))));

        let group = store.get_group_by_id(group.id).await.unwrap().unwrap();
        assert_eq!(group.times_seen, 1);
        assert_eq!(group.time_spent_total, i64::MAX);
        assert_eq!(store.list_events(group.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolved_group_reopens_on_new_event() {
        let store = MemoryStore::new();
        let (group, _) = store.get_or_create_group(&new_group(1, "abc")).await.unwrap();

        let resolved = store.resolve_group(group.id).await.unwrap();
        assert_eq!(resolved.status, GroupStatus::Resolved);
        assert!(resolved.resolved_at.is_some());

        let (_, reopened) = store.record_event(&new_event(group.id, None), Utc::now()).await.unwrap();
        assert_eq!(reopened.status, GroupStatus::Unresolved);
        assert!(reopened.resolved_at.is_none());
    }

    #[tokio::test]
    async fn muted_group_stays_muted() {
        let store = MemoryStore::new();
        let (group, _) = store.get_or_create_group(&new_group(1, "abc")).await.unwrap();

        store.mute_group(group.id).await.unwrap();
        let (_, updated) = store.record_event(&new_event(group.id, None), Utc::now()).await.unwrap();
        assert_eq!(updated.status, GroupStatus::Muted);

        let unmuted = store.unresolve_group(group.id).await.unwrap();
        assert_eq!(unmuted.status, GroupStatus::Unresolved);
    }

    #[tokio::test]
    async fn events_require_existing_group() {
        let store = MemoryStore::new();
        let result = store.record_event(&new_event(99, None), Utc::now()).await;
        assert!(matches!(result, Err(StoreError::GroupNotFound(99))));
        assert_eq!(store.event_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn list_events_filters_by_group() {
        let store = MemoryStore::new();
        let (a, _) = store.get_or_create_group(&new_group(1, "a")).await.unwrap();
        let (b, _) = store.get_or_create_group(&new_group(1, "b")).await.unwrap();

        for group_id in [a.id, a.id, b.id] {
            store.record_event(&new_event(group_id, None), Utc::now()).await.unwrap();
        }

        let events = store.list_events(a.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].id < events[1].id);
        assert_eq!(store.event_count().unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creation_yields_single_group() {
        let store = Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let (group, _) = store.get_or_create_group(&new_group(1, "same")).await.unwrap();
                    store
                        .record_event(&new_event(group.id, None), Utc::now())
                        .await
                        .unwrap();
                    group.id
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();

        assert_eq!(ids.len(), 1);
        let group = store.get_group(ProjectId::new(1), "same").await.unwrap().unwrap();
        assert_eq!(group.times_seen, 16);
    }
}

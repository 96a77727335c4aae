//! PostgreSQL event store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::error::{StoreError, StoreResult};
use crate::types::{GroupStatus, Level, ProjectId};

use super::{Event, EventGroup, EventStore, NewEvent, NewGroup};

const GROUP_COLUMNS: &str = "id, project_id, logger, level, message, culprit, checksum, \
     platform, status, times_seen, first_seen, last_seen, active_at, resolved_at, \
     time_spent_total, time_spent_count, data";

const EVENT_COLUMNS: &str = "id, event_id, project_id, group_id, message, level, logger, \
     server_name, culprit, platform, checksum, time_spent, datetime, data";

/// PostgreSQL-backed event store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required tables exist.
    async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_groups (
                id BIGSERIAL PRIMARY KEY,
                project_id BIGINT NOT NULL,
                logger TEXT NOT NULL,
                level INTEGER NOT NULL,
                message TEXT NOT NULL,
                culprit TEXT NOT NULL,
                checksum TEXT NOT NULL,
                platform TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'unresolved',
                times_seen BIGINT NOT NULL DEFAULT 0,
                first_seen TIMESTAMPTZ NOT NULL,
                last_seen TIMESTAMPTZ NOT NULL,
                active_at TIMESTAMPTZ NOT NULL,
                resolved_at TIMESTAMPTZ,
                time_spent_total BIGINT NOT NULL DEFAULT 0,
                time_spent_count BIGINT NOT NULL DEFAULT 0,
                data JSONB NOT NULL DEFAULT '{}'::jsonb,
                UNIQUE (project_id, checksum)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id BIGSERIAL PRIMARY KEY,
                event_id TEXT NOT NULL,
                project_id BIGINT NOT NULL,
                group_id BIGINT NOT NULL REFERENCES event_groups(id),
                message TEXT NOT NULL,
                level INTEGER NOT NULL,
                logger TEXT NOT NULL,
                server_name TEXT NOT NULL,
                culprit TEXT NOT NULL,
                platform TEXT NOT NULL,
                checksum TEXT NOT NULL,
                time_spent BIGINT,
                datetime TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_events_group_id
            ON events (group_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_event_groups_last_seen
            ON event_groups (project_id, last_seen DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Parse a row into an EventGroup.
    fn row_to_group(row: &PgRow) -> StoreResult<EventGroup> {
        let level_code: i32 = row.get("level");
        let status_str: String = row.get("status");

        let level = Level::try_from(level_code).map_err(StoreError::Serialisation)?;
        let status: GroupStatus = status_str.parse().map_err(|e| {
            StoreError::Serialisation(format!("failed to parse status '{status_str}': {e}"))
        })?;

        Ok(EventGroup {
            id: row.get("id"),
            project: ProjectId::new(row.get("project_id")),
            logger: row.get("logger"),
            level,
            message: row.get("message"),
            culprit: row.get("culprit"),
            checksum: row.get("checksum"),
            platform: row.get("platform"),
            status,
            times_seen: row.get("times_seen"),
            first_seen: row.get("first_seen"),
            last_seen: row.get("last_seen"),
            active_at: row.get("active_at"),
            resolved_at: row.get("resolved_at"),
            time_spent_total: row.get("time_spent_total"),
            time_spent_count: row.get("time_spent_count"),
            data: row.get("data"),
        })
    }

    /// Parse a row into an Event.
    fn row_to_event(row: &PgRow) -> StoreResult<Event> {
        let level_code: i32 = row.get("level");
        let level = Level::try_from(level_code).map_err(StoreError::Serialisation)?;

        Ok(Event {
            id: row.get("id"),
            event_id: row.get("event_id"),
            project: ProjectId::new(row.get("project_id")),
            group_id: row.get("group_id"),
            message: row.get("message"),
            level,
            logger: row.get("logger"),
            server_name: row.get("server_name"),
            culprit: row.get("culprit"),
            platform: row.get("platform"),
            checksum: row.get("checksum"),
            time_spent: row.get("time_spent"),
            datetime: row.get("datetime"),
            data: row.get("data"),
        })
    }
}

#[async_trait]
impl EventStore for PostgresStore {
    async fn get_or_create_group(&self, group: &NewGroup) -> StoreResult<(EventGroup, bool)> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO event_groups (
                project_id, logger, level, message, culprit, checksum, platform,
                status, times_seen, first_seen, last_seen, active_at, data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'unresolved', 0, $8, $8, $8, $9)
            ON CONFLICT (project_id, checksum) DO NOTHING
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(group.project.get())
        .bind(&group.logger)
        .bind(group.level.code())
        .bind(&group.message)
        .bind(&group.culprit)
        .bind(&group.checksum)
        .bind(&group.platform)
        .bind(group.seen_at)
        .bind(&group.data)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((Self::row_to_group(&row)?, true));
        }

        // Lost the race (or the group already existed)
        let existing = self.get_group(group.project, &group.checksum).await?;
        existing.map(|g| (g, false)).ok_or_else(|| {
            StoreError::internal(format!(
                "group for project {} checksum {} vanished after conflict",
                group.project, group.checksum
            ))
        })
    }

    async fn record_event(
        &self,
        event: &NewEvent,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<(Event, EventGroup)> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO events (
                event_id, project_id, group_id, message, level, logger,
                server_name, culprit, platform, checksum, time_spent, datetime, data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(&event.event_id)
        .bind(event.project.get())
        .bind(event.group_id)
        .bind(&event.message)
        .bind(event.level.code())
        .bind(&event.logger)
        .bind(&event.server_name)
        .bind(&event.culprit)
        .bind(&event.platform)
        .bind(&event.checksum)
        .bind(event.time_spent)
        .bind(event.datetime)
        .bind(&event.data)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                StoreError::GroupNotFound(event.group_id)
            }
            other => StoreError::Database(other),
        })?;

        // Every SET expression reads the pre-update row
        let counted = sqlx::query(&format!(
            r#"
            UPDATE event_groups SET
                times_seen = times_seen + 1,
                last_seen = $2,
                time_spent_total = time_spent_total + COALESCE($3::BIGINT, 0),
                time_spent_count = time_spent_count
                    + CASE WHEN $3::BIGINT IS NULL THEN 0 ELSE 1 END,
                status = CASE WHEN status = 'resolved' THEN 'unresolved' ELSE status END,
                active_at = CASE WHEN status = 'resolved' THEN $2 ELSE active_at END,
                resolved_at = CASE WHEN status = 'resolved' THEN NULL ELSE resolved_at END
            WHERE id = $1
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(event.group_id)
        .bind(seen_at)
        .bind(event.time_spent)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::GroupNotFound(event.group_id))?;

        let stored = Self::row_to_event(&inserted)?;
        let group = Self::row_to_group(&counted)?;
        tx.commit().await?;

        Ok((stored, group))
    }

    async fn get_group(
        &self,
        project: ProjectId,
        checksum: &str,
    ) -> StoreResult<Option<EventGroup>> {
        let row = sqlx::query(&format!(
            "SELECT {GROUP_COLUMNS} FROM event_groups WHERE project_id = $1 AND checksum = $2"
        ))
        .bind(project.get())
        .bind(checksum)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_group).transpose()
    }

    async fn get_group_by_id(&self, group_id: i64) -> StoreResult<Option<EventGroup>> {
        let row = sqlx::query(&format!(
            "SELECT {GROUP_COLUMNS} FROM event_groups WHERE id = $1"
        ))
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_group).transpose()
    }

    async fn list_events(&self, group_id: i64) -> StoreResult<Vec<Event>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE group_id = $1 ORDER BY id"
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn set_group_status(
        &self,
        group_id: i64,
        status: GroupStatus,
    ) -> StoreResult<EventGroup> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE event_groups SET
                status = $2,
                resolved_at = CASE
                    WHEN $2 = 'resolved' THEN NOW()
                    WHEN $2 = 'unresolved' THEN NULL
                    ELSE resolved_at
                END,
                active_at = CASE WHEN $2 = 'unresolved' THEN NOW() ELSE active_at END
            WHERE id = $1
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(group_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::GroupNotFound(group_id))?;

        Self::row_to_group(&row)
    }
}

//! PostgreSQL queue backend.
//!
//! All queues share one table; a message belongs to whichever queue its
//! `queue_name` column names. Claiming uses `FOR UPDATE SKIP LOCKED` so
//! concurrent consumers never claim the same row.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use crate::error::QueueError;
use crate::traits::QueueBackend;
use crate::types::{Message, MessageId};

/// Statements with the table name filled in, built once per backend.
#[derive(Debug)]
struct Statements {
    publish: String,
    receive: String,
    ack: String,
    nack: String,
    dead_letter: String,
    depth: String,
}

impl Statements {
    fn for_table(table: &str) -> Self {
        Self {
            publish: format!("INSERT INTO {table} (queue_name, payload) VALUES ($1, $2) RETURNING id"),
            receive: format!(
                r#"
                UPDATE {table} SET
                    visible_at = NOW() + make_interval(secs => $2),
                    attempt = attempt + 1
                WHERE id = (
                    SELECT id FROM {table}
                    WHERE queue_name = $1 AND visible_at <= NOW()
                    ORDER BY id
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id, payload, attempt, enqueued_at
                "#
            ),
            ack: format!("DELETE FROM {table} WHERE id = $1 AND queue_name = $2"),
            nack: format!("UPDATE {table} SET visible_at = NOW() WHERE id = $1 AND queue_name = $2"),
            dead_letter: format!(
                r#"
                UPDATE {table} SET
                    queue_name = $3,
                    attempt = 0,
                    visible_at = NOW()
                WHERE id = $1 AND queue_name = $2
                "#
            ),
            depth: format!("SELECT COUNT(*) AS depth FROM {table} WHERE queue_name = $1"),
        }
    }
}

/// PostgreSQL-backed queue.
#[derive(Clone)]
pub struct PostgresQueue {
    pool: PgPool,
    table: String,
    sql: Arc<Statements>,
}

impl PostgresQueue {
    /// Connect and create the queue table if it doesn't exist.
    pub async fn new(url: &str, table: String, max_connections: u32) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Self::from_pool(pool, table).await
    }

    /// Build a queue on an existing pool.
    ///
    /// `table` is spliced into SQL, so only ASCII letters, digits, `_` and a
    /// schema-qualifying `.` are accepted.
    pub async fn from_pool(pool: PgPool, table: String) -> Result<Self, QueueError> {
        if !is_plain_identifier(&table) {
            return Err(QueueError::InvalidTable(table));
        }

        let queue = Self {
            pool,
            sql: Arc::new(Statements::for_table(&table)),
            table,
        };
        queue.ensure_table().await?;
        Ok(queue)
    }

    async fn ensure_table(&self) -> Result<(), QueueError> {
        let table = &self.table;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                queue_name TEXT NOT NULL,
                payload BYTEA NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 0,
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                visible_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {}_claim_idx ON {table} (queue_name, visible_at, id)",
            table.replace('.', "_")
        ))
        .execute(&self.pool)
        .await?;

        info!(table = %self.table, "Queue table ready");
        Ok(())
    }

    /// Run a keyed update and report a miss as an unknown message.
    async fn update_one(
        &self,
        sql: &str,
        queue: &str,
        id: MessageId,
        extra: Option<&str>,
    ) -> Result<(), QueueError> {
        let mut query = sqlx::query(sql).bind(id.get()).bind(queue);
        if let Some(value) = extra {
            query = query.bind(value);
        }

        if query.execute(&self.pool).await?.rows_affected() == 0 {
            return Err(QueueError::unknown(queue, id));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for PostgresQueue {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<MessageId, QueueError> {
        let id: i64 = sqlx::query(&self.sql.publish)
            .bind(queue)
            .bind(payload)
            .fetch_one(&self.pool)
            .await?
            .get("id");
        Ok(MessageId::new(id))
    }

    async fn receive(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<Message>, QueueError> {
        let row = sqlx::query(&self.sql.receive)
            .bind(queue)
            .bind(visibility_timeout.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| {
            let attempt: i32 = row.get("attempt");
            let enqueued_at: DateTime<Utc> = row.get("enqueued_at");
            Message {
                id: MessageId::new(row.get("id")),
                payload: row.get("payload"),
                attempt: u32::try_from(attempt).unwrap_or_default(),
                enqueued_at,
            }
        }))
    }

    async fn ack(&self, queue: &str, id: MessageId) -> Result<(), QueueError> {
        self.update_one(&self.sql.ack, queue, id, None).await
    }

    async fn nack(&self, queue: &str, id: MessageId) -> Result<(), QueueError> {
        self.update_one(&self.sql.nack, queue, id, None).await
    }

    async fn dead_letter(
        &self,
        queue: &str,
        id: MessageId,
        dead_queue: &str,
    ) -> Result<(), QueueError> {
        self.update_one(&self.sql.dead_letter, queue, id, Some(dead_queue))
            .await?;
        debug!(from = queue, to = dead_queue, %id, "Message dead-lettered");
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        let depth: i64 = sqlx::query(&self.sql.depth)
            .bind(queue)
            .fetch_one(&self.pool)
            .await?
            .get("depth");
        Ok(usize::try_from(depth).unwrap_or_default())
    }
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

impl std::fmt::Debug for PostgresQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresQueue")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs a running PostgreSQL; run with `--features postgres -- --ignored`
    // and DATABASE_URL pointing at a scratch database.

    const LONG: Duration = Duration::from_secs(30);

    async fn connect(table: &str) -> PostgresQueue {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        PostgresQueue::new(&url, table.to_owned(), 5)
            .await
            .expect("connect to PostgreSQL")
    }

    /// Queue name unique to this run, so reruns start empty.
    fn fresh(name: &str) -> String {
        format!("{name}-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn claim_nack_ack() {
        let queue = connect("faultline_test_queue").await;
        let name = fresh("claims");

        let id = queue.publish(&name, b"payload").await.unwrap();
        let first = queue
            .receive(&name, Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();
        assert_eq!((first.id, first.attempt), (id, 1));
        assert!(queue.receive(&name, LONG).await.unwrap().is_none());

        queue.nack(&name, id).await.unwrap();
        let second = queue.receive(&name, LONG).await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);

        queue.ack(&name, id).await.unwrap();
        assert_eq!(queue.depth(&name).await.unwrap(), 0);
        assert!(matches!(
            queue.ack(&name, id).await,
            Err(QueueError::UnknownMessage { .. })
        ));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn dead_letter_moves_row() {
        let queue = connect("faultline_test_queue").await;
        let name = fresh("events");
        let dead = format!("{name}.dead");

        let id = queue.publish(&name, b"poison").await.unwrap();
        queue.receive(&name, LONG).await.unwrap().unwrap();
        queue.dead_letter(&name, id, &dead).await.unwrap();

        assert_eq!(queue.depth(&name).await.unwrap(), 0);
        let parked = queue.receive(&dead, LONG).await.unwrap().unwrap();
        assert_eq!(parked.id, id);
        assert_eq!(parked.payload, b"poison");
        assert_eq!(parked.attempt, 1);

        assert!(queue.dead_letter(&name, id, &dead).await.is_err());
        queue.ack(&dead, id).await.unwrap();
    }

    #[test]
    fn table_names_are_plain_identifiers() {
        assert!(is_plain_identifier("faultline_queue"));
        assert!(is_plain_identifier("ops.faultline_queue"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("9queue"));
        assert!(!is_plain_identifier("queue; DROP TABLE x"));
    }
}

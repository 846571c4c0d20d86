//! SQLite event store.
//!
//! `UNIQUE(execution_id, sequence)` makes duplicate sequence numbers
//! impossible at the storage layer. Gaps are rejected by the append itself:
//! the insert only matches when the new sequence follows the current maximum.
//! Lock contention between executions surfaces as `StorageUnavailable`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindloop_core::error::EventStoreError;
use mindloop_core::event::{Event, EventKind, EventStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteEventStore {
    pool: SqlitePool,
}

/// `SQLITE_BUSY` and `SQLITE_LOCKED`, including their extended codes.
fn is_busy(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

fn classify(e: sqlx::Error, context: &str) -> EventStoreError {
    match e {
        ref busy if is_busy(busy) => EventStoreError::StorageUnavailable(format!("{context}: {e}")),
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            EventStoreError::StorageUnavailable(format!("{context}: {e}"))
        }
        other => EventStoreError::QueryFailed(format!("{context}: {other}")),
    }
}

impl SqliteEventStore {
    /// Open (or create) an event store at `path`.
    pub async fn new(path: &str) -> Result<Self, EventStoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| EventStoreError::StorageUnavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| {
                EventStoreError::StorageUnavailable(format!("Failed to open SQLite: {e}"))
            })?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite event store initialized at {path}");
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, EventStoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                event_id      TEXT PRIMARY KEY,
                execution_id  TEXT NOT NULL,
                sequence      INTEGER NOT NULL,
                kind          TEXT NOT NULL,
                payload       TEXT NOT NULL,
                timestamp     TEXT NOT NULL,
                UNIQUE(execution_id, sequence)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::QueryFailed(format!("events table: {e}")))?;

        debug!("SQLite event migrations complete");
        Ok(())
    }

    /// Execution ids, most recently started first.
    pub async fn execution_ids(&self, limit: usize) -> Result<Vec<String>, EventStoreError> {
        let rows = sqlx::query(
            "SELECT execution_id FROM events WHERE sequence = 1 ORDER BY timestamp DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(e, "list executions"))?;

        rows.iter()
            .map(|r| {
                r.try_get::<String, _>("execution_id")
                    .map_err(|e| EventStoreError::QueryFailed(format!("execution_id column: {e}")))
            })
            .collect()
    }

    /// The conflict error for a rejected append, naming the sequence the
    /// store expected next.
    async fn conflict(&self, event: &Event) -> EventStoreError {
        let last = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(sequence), 0) FROM events WHERE execution_id = ?1",
        )
        .bind(&event.execution_id)
        .fetch_one(&self.pool)
        .await;

        match last {
            Ok(last) => EventStoreError::SequenceConflict {
                execution_id: event.execution_id.clone(),
                expected: last as u64 + 1,
                got: event.sequence,
            },
            Err(e) => classify(e, "read last sequence"),
        }
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<Event, EventStoreError> {
        let get = |col: &str| -> Result<String, EventStoreError> {
            row.try_get::<String, _>(col)
                .map_err(|e| EventStoreError::QueryFailed(format!("{col} column: {e}")))
        };

        let sequence: i64 = row
            .try_get("sequence")
            .map_err(|e| EventStoreError::QueryFailed(format!("sequence column: {e}")))?;
        let kind_str = get("kind")?;
        let kind = EventKind::parse(&kind_str)
            .ok_or_else(|| EventStoreError::QueryFailed(format!("unknown event kind '{kind_str}'")))?;
        let payload = serde_json::from_str(&get("payload")?)
            .map_err(|e| EventStoreError::QueryFailed(format!("payload JSON: {e}")))?;
        let timestamp = DateTime::parse_from_rfc3339(&get("timestamp")?)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| EventStoreError::QueryFailed(format!("timestamp: {e}")))?;

        Ok(Event {
            event_id: get("event_id")?,
            execution_id: get("execution_id")?,
            sequence: sequence as u64,
            kind,
            payload,
            timestamp,
        })
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, event: &Event) -> Result<(), EventStoreError> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| EventStoreError::QueryFailed(format!("payload serialization: {e}")))?;

        // A single write statement takes the write lock up front, so
        // concurrent executions queue on the busy timeout instead of
        // failing a read-to-write upgrade.
        let inserted = sqlx::query(
            r#"
            INSERT INTO events (event_id, execution_id, sequence, kind, payload, timestamp)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6
            WHERE (SELECT COALESCE(MAX(sequence), 0) FROM events WHERE execution_id = ?2) = ?3 - 1
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.execution_id)
        .bind(event.sequence as i64)
        .bind(event.kind.as_str())
        .bind(&payload)
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(result) if result.rows_affected() == 1 => Ok(()),
            Ok(_) => Err(self.conflict(event).await),
            Err(sqlx::Error::Database(ref db)) if db.is_unique_violation() => {
                Err(self.conflict(event).await)
            }
            Err(e) => Err(classify(e, "INSERT event")),
        }
    }

    async fn read_all(&self, execution_id: &str) -> Result<Vec<Event>, EventStoreError> {
        let rows = sqlx::query("SELECT * FROM events WHERE execution_id = ?1 ORDER BY sequence ASC")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(e, "read events"))?;

        rows.iter().map(Self::row_to_event).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteEventStore {
        SqliteEventStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn append_and_replay() {
        let store = test_store().await;
        store
            .append(&Event::new(
                "e1",
                1,
                EventKind::ExecutionStarted,
                serde_json::json!({"pattern": "sequential-reflection"}),
            ))
            .await
            .unwrap();
        store
            .append(&Event::new(
                "e1",
                2,
                EventKind::StepStarted,
                serde_json::json!({"step_index": 0}),
            ))
            .await
            .unwrap();

        let events = store.read_all("e1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::ExecutionStarted);
        assert_eq!(events[0].payload["pattern"], "sequential-reflection");
        assert_eq!(events[1].sequence, 2);
    }

    #[tokio::test]
    async fn rejects_out_of_order_sequence() {
        let store = test_store().await;
        let err = store
            .append(&Event::new("e1", 3, EventKind::StepStarted, serde_json::Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EventStoreError::SequenceConflict { expected: 1, got: 3, .. }
        ));
        assert!(store.read_all("e1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_started_executions() {
        let store = test_store().await;
        for exec in ["e1", "e2"] {
            store
                .append(&Event::new(exec, 1, EventKind::ExecutionStarted, serde_json::Value::Null))
                .await
                .unwrap();
        }
        let ids = store.execution_ids(10).await.unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_executions_share_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let store = std::sync::Arc::new(
            SqliteEventStore::new(path.to_str().unwrap()).await.unwrap(),
        );

        let writers: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move {
                    let exec = format!("exec-{n}");
                    for seq in 1..=50 {
                        store
                            .append(&Event::new(
                                &exec,
                                seq,
                                EventKind::StepStarted,
                                serde_json::json!({"step_index": seq - 1}),
                            ))
                            .await?;
                    }
                    Ok::<_, EventStoreError>(exec)
                })
            })
            .collect();

        for writer in writers {
            let exec = writer.await.unwrap().unwrap();
            let events = store.read_all(&exec).await.unwrap();
            let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
            assert_eq!(sequences, (1..=50).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn duplicate_sequence_reports_next_expected() {
        let store = test_store().await;
        store
            .append(&Event::new("e1", 1, EventKind::ExecutionStarted, serde_json::Value::Null))
            .await
            .unwrap();
        let err = store
            .append(&Event::new("e1", 1, EventKind::StepStarted, serde_json::Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EventStoreError::SequenceConflict { expected: 2, got: 1, .. }
        ));
    }
}

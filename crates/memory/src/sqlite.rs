//! SQLite memory store.
//!
//! One table, `memories`, with an integer rowid that fixes insertion order.
//! Records are only ever inserted; nothing updates or deletes them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindloop_core::error::MemoryError;
use mindloop_core::memory::{
    MemoryContent, MemoryKind, MemoryQuery, MemoryRecord, MemoryStore, RecallOrder,
    RelevanceRanker,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ranking::{KeywordOverlap, order_records};

/// A durable SQLite memory store.
pub struct SqliteMemoryStore {
    pool: SqlitePool,
    ranker: Arc<dyn RelevanceRanker>,
}

/// `SQLITE_BUSY` and `SQLITE_LOCKED`, including their extended codes.
fn is_busy(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

/// Connection-level failures and lock contention are transient; everything
/// else is a query error.
fn classify(e: sqlx::Error, context: &str) -> MemoryError {
    match e {
        ref busy if is_busy(busy) => MemoryError::StorageUnavailable(format!("{context}: {e}")),
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => MemoryError::StorageUnavailable(format!("{context}: {e}")),
        other => MemoryError::QueryFailed(format!("{context}: {other}")),
    }
}

impl SqliteMemoryStore {
    /// Open (or create) a store at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::StorageUnavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to `:memory:` is its own database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::StorageUnavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite memory store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self {
            pool,
            ranker: Arc::new(KeywordOverlap),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn with_ranker(mut self, ranker: Arc<dyn RelevanceRanker>) -> Self {
        self.ranker = ranker;
        self
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                id           TEXT UNIQUE NOT NULL,
                agent_id     TEXT NOT NULL,
                kind         TEXT NOT NULL,
                content      TEXT NOT NULL,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("memories table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_memories_agent_kind ON memories(agent_id, kind, iid)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("agent index: {e}")))?;

        debug!("SQLite memory migrations complete");
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<MemoryRecord, MemoryError> {
        let get = |col: &str| -> Result<String, MemoryError> {
            row.try_get::<String, _>(col)
                .map_err(|e| MemoryError::QueryFailed(format!("{col} column: {e}")))
        };

        let kind_str = get("kind")?;
        let kind = MemoryKind::parse(&kind_str)
            .ok_or_else(|| MemoryError::QueryFailed(format!("unknown memory kind '{kind_str}'")))?;

        let content: MemoryContent = serde_json::from_str(&get("content")?)
            .map_err(|e| MemoryError::QueryFailed(format!("content JSON: {e}")))?;

        let created_at = DateTime::parse_from_rfc3339(&get("created_at")?)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| MemoryError::QueryFailed(format!("created_at: {e}")))?;

        Ok(MemoryRecord::new(
            get("id")?,
            get("agent_id")?,
            kind,
            content,
            created_at,
        ))
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn store(
        &self,
        agent_id: &str,
        kind: MemoryKind,
        content: MemoryContent,
    ) -> Result<MemoryRecord, MemoryError> {
        let record = MemoryRecord::new(
            Uuid::new_v4().to_string(),
            agent_id,
            kind,
            content,
            Utc::now(),
        );
        let content_json = serde_json::to_string(record.content())
            .map_err(|e| MemoryError::QueryFailed(format!("content serialization: {e}")))?;

        sqlx::query(
            "INSERT INTO memories (id, agent_id, kind, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(record.id())
        .bind(record.agent_id())
        .bind(record.kind().as_str())
        .bind(&content_json)
        .bind(record.created_at().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "INSERT failed"))?;

        debug!(memory_id = %record.id(), agent_id, kind = %record.kind(), "Stored memory");
        Ok(record)
    }

    async fn retrieve(
        &self,
        agent_id: &str,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let kind = query.kind.as_ref().map(|k| k.as_str());
        let filter = "WHERE agent_id = ?1 AND (?2 IS NULL OR kind = ?2)";

        // Relevance ranking happens in process over the agent's full history.
        let (direction, limit) = match query.order {
            RecallOrder::MostRecentFirst => ("DESC", query.limit as i64),
            RecallOrder::OldestFirst => ("ASC", query.limit as i64),
            RecallOrder::Relevance => ("ASC", -1),
        };
        let sql = format!("SELECT * FROM memories {filter} ORDER BY iid {direction} LIMIT ?3");

        let rows = sqlx::query(&sql)
            .bind(agent_id)
            .bind(kind)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(e, "SELECT failed"))?;

        let records = rows
            .iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>, _>>()?;

        if query.order == RecallOrder::Relevance {
            Ok(order_records(records, query, self.ranker.as_ref()))
        } else {
            Ok(records)
        }
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        let row = sqlx::query("SELECT * FROM memories WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "GET by ID"))?;

        match row {
            Some(ref r) => Ok(Some(Self::row_to_record(r)?)),
            None => Ok(None),
        }
    }

    async fn count(&self, agent_id: &str) -> Result<usize, MemoryError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM memories WHERE agent_id = ?1")
            .bind(agent_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, "COUNT"))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| MemoryError::QueryFailed(format!("cnt column: {e}")))?;

        Ok(cnt as usize)
    }
}

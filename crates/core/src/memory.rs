//! Memory trait: durable, typed, append-only context for an agent.
//!
//! Every reasoning step that produces durable context writes a new
//! [`MemoryRecord`]. Records are never mutated or deleted by the engine;
//! new facts create new records. Retrieval is always scoped to one agent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MemoryError;

/// Structured payload of a memory record.
pub type MemoryContent = serde_json::Map<String, serde_json::Value>;

/// A single memory record.
///
/// Fields are private so a record cannot be altered once a store has
/// produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    id: String,
    agent_id: String,
    kind: MemoryKind,
    content: MemoryContent,
    created_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Build a record. Only stores should call this; everyone else receives
    /// records from [`MemoryStore::store`] or [`MemoryStore::retrieve`].
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        kind: MemoryKind,
        content: MemoryContent,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            kind,
            content,
            created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn kind(&self) -> &MemoryKind {
        &self.kind
    }

    pub fn content(&self) -> &MemoryContent {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The human-readable text of this record.
    ///
    /// Uses the `text` key when present, otherwise the compact JSON payload.
    pub fn text(&self) -> String {
        match self.content.get("text").and_then(|v| v.as_str()) {
            Some(text) => text.to_string(),
            None => serde_json::Value::Object(self.content.clone()).to_string(),
        }
    }
}

/// The type tag of a memory record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Output of a plain reasoning step.
    Observation,
    /// Output of a critique/improvement step.
    Reflection,
    /// Observation returned by an external tool.
    ToolResult,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Observation => "observation",
            MemoryKind::Reflection => "reflection",
            MemoryKind::ToolResult => "tool_result",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "observation" => Some(MemoryKind::Observation),
            "reflection" => Some(MemoryKind::Reflection),
            "tool_result" => Some(MemoryKind::ToolResult),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How retrieved records are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallOrder {
    #[default]
    MostRecentFirst,
    OldestFirst,
    /// Ranked by the store's [`RelevanceRanker`] against `MemoryQuery::text`,
    /// ties broken most-recent-first.
    Relevance,
}

/// A retrieval query, always scoped to a single agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// Only return records of this kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MemoryKind>,

    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    #[serde(default)]
    pub order: RecallOrder,

    /// Text to rank against when `order` is `Relevance`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

fn default_limit() -> usize {
    5
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            kind: None,
            limit: default_limit(),
            order: RecallOrder::default(),
            text: None,
        }
    }
}

impl MemoryQuery {
    pub fn recent(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn of_kind(mut self, kind: MemoryKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Scores a record against query text. Higher is more relevant.
pub trait RelevanceRanker: Send + Sync {
    /// A stable name used in configuration and logs.
    fn name(&self) -> &str;

    fn score(&self, query_text: &str, record: &MemoryRecord) -> f32;
}

/// The core MemoryStore trait.
///
/// Implementations: in-memory (reference), SQLite.
///
/// Concurrent `store` calls must each yield a distinct record. A `retrieve`
/// must observe every `store` that completed before it started.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "sqlite").
    fn name(&self) -> &str;

    /// Append a new record. All-or-nothing: on error nothing was written.
    async fn store(
        &self,
        agent_id: &str,
        kind: MemoryKind,
        content: MemoryContent,
    ) -> std::result::Result<MemoryRecord, MemoryError>;

    /// Retrieve records for one agent. Never returns another agent's records.
    async fn retrieve(
        &self,
        agent_id: &str,
        query: &MemoryQuery,
    ) -> std::result::Result<Vec<MemoryRecord>, MemoryError>;

    /// Get a record by id.
    async fn get(&self, id: &str) -> std::result::Result<Option<MemoryRecord>, MemoryError>;

    /// Number of records held for an agent.
    async fn count(&self, agent_id: &str) -> std::result::Result<usize, MemoryError>;
}

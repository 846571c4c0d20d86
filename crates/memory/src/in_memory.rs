//! In-memory backend: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use mindloop_core::error::MemoryError;
use mindloop_core::memory::{
    MemoryContent, MemoryKind, MemoryQuery, MemoryRecord, MemoryStore, RelevanceRanker,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::ranking::{KeywordOverlap, order_records};

/// An in-memory store that keeps records in insertion order.
pub struct InMemoryStore {
    records: Arc<RwLock<Vec<MemoryRecord>>>,
    ranker: Arc<dyn RelevanceRanker>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            ranker: Arc::new(KeywordOverlap),
        }
    }

    /// Use a custom relevance ranker.
    pub fn with_ranker(mut self, ranker: Arc<dyn RelevanceRanker>) -> Self {
        self.ranker = ranker;
        self
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
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
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn retrieve(
        &self,
        agent_id: &str,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let records = self.records.read().await;
        let matching: Vec<MemoryRecord> = records
            .iter()
            .filter(|r| r.agent_id() == agent_id)
            .filter(|r| query.kind.as_ref().is_none_or(|k| r.kind() == k))
            .cloned()
            .collect();
        Ok(order_records(matching, query, self.ranker.as_ref()))
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id() == id).cloned())
    }

    async fn count(&self, agent_id: &str) -> Result<usize, MemoryError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| r.agent_id() == agent_id).count())
    }
}

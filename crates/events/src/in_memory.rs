//! In-memory event log, keyed by execution.

use async_trait::async_trait;
use mindloop_core::error::EventStoreError;
use mindloop_core::event::{Event, EventStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct InMemoryEventStore {
    logs: Arc<RwLock<HashMap<String, Vec<Event>>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            logs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Ids of every execution with at least one event.
    pub async fn execution_ids(&self) -> Vec<String> {
        self.logs.read().await.keys().cloned().collect()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, event: &Event) -> Result<(), EventStoreError> {
        let mut logs = self.logs.write().await;
        let log = logs.entry(event.execution_id.clone()).or_default();
        let expected = log.last().map_or(1, |e| e.sequence + 1);
        if event.sequence != expected {
            return Err(EventStoreError::SequenceConflict {
                execution_id: event.execution_id.clone(),
                expected,
                got: event.sequence,
            });
        }
        log.push(event.clone());
        Ok(())
    }

    async fn read_all(&self, execution_id: &str) -> Result<Vec<Event>, EventStoreError> {
        let logs = self.logs.read().await;
        Ok(logs.get(execution_id).cloned().unwrap_or_default())
    }
}

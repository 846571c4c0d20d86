//! Execution events: the append-only audit trail of every run.
//!
//! Each execution owns a strictly increasing `sequence` starting at 1.
//! Events are never rewritten, so an execution can be replayed from its
//! log alone. Committed events are also re-published on an [`EventBus`]
//! for live observers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::EventStoreError;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ExecutionStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    PatternDecision,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionCancelled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ExecutionStarted => "execution_started",
            EventKind::StepStarted => "step_started",
            EventKind::StepCompleted => "step_completed",
            EventKind::StepFailed => "step_failed",
            EventKind::PatternDecision => "pattern_decision",
            EventKind::ExecutionCompleted => "execution_completed",
            EventKind::ExecutionFailed => "execution_failed",
            EventKind::ExecutionCancelled => "execution_cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "execution_started" => Some(EventKind::ExecutionStarted),
            "step_started" => Some(EventKind::StepStarted),
            "step_completed" => Some(EventKind::StepCompleted),
            "step_failed" => Some(EventKind::StepFailed),
            "pattern_decision" => Some(EventKind::PatternDecision),
            "execution_completed" => Some(EventKind::ExecutionCompleted),
            "execution_failed" => Some(EventKind::ExecutionFailed),
            "execution_cancelled" => Some(EventKind::ExecutionCancelled),
            _ => None,
        }
    }

    /// Whether this event closes an execution's trail.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::ExecutionCompleted | EventKind::ExecutionFailed | EventKind::ExecutionCancelled
        )
    }
}

/// A single immutable event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub execution_id: String,
    pub sequence: u64,
    pub kind: EventKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        execution_id: impl Into<String>,
        sequence: u64,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            execution_id: execution_id.into(),
            sequence,
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// The core EventStore trait.
///
/// Implementations: in-memory (reference), SQLite.
///
/// `append` must reject an event whose `sequence` is not exactly one past
/// the last committed sequence for its execution.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "sqlite").
    fn name(&self) -> &str;

    async fn append(&self, event: &Event) -> std::result::Result<(), EventStoreError>;

    /// All events of one execution, ordered by sequence.
    async fn read_all(&self, execution_id: &str)
    -> std::result::Result<Vec<Event>, EventStoreError>;

    /// Called once an execution reaches a terminal state.
    async fn flush(&self, _execution_id: &str) -> std::result::Result<(), EventStoreError> {
        Ok(())
    }
}

/// A broadcast-based bus re-publishing committed events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Slow subscribers lag and drop; the event store remains the source of truth.
pub struct EventBus {
    sender: broadcast::Sender<Arc<Event>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: Event) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

//! Error types for the mindloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all mindloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Event store errors ---
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Pattern / orchestration errors ---
    #[error("Pattern gave up after reaching its step limit of {max_steps}")]
    TerminationLimitReached { max_steps: usize },

    #[error("Execution was cancelled")]
    Cancelled,

    #[error("Unknown pattern: {0}")]
    UnknownPattern(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the retry policy may re-attempt the operation that produced
    /// this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Model(ModelError::Unavailable(_))
                | Error::Memory(MemoryError::StorageUnavailable(_))
                | Error::EventStore(EventStoreError::StorageUnavailable(_))
        )
    }

    /// The stable classification recorded on a failed execution.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Model(ModelError::Unavailable(_)) => ErrorKind::ModelUnavailable,
            Error::Model(ModelError::Rejected(_)) => ErrorKind::ModelRejected,
            Error::Memory(MemoryError::StorageUnavailable(_))
            | Error::EventStore(EventStoreError::StorageUnavailable(_)) => {
                ErrorKind::StorageUnavailable
            }
            Error::Memory(_) | Error::EventStore(_) => ErrorKind::Storage,
            Error::Tool(_) => ErrorKind::ToolFailed,
            Error::TerminationLimitReached { .. } => ErrorKind::PatternTerminationLimitReached,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::UnknownPattern(_) | Error::ExecutionNotFound(_) | Error::Config { .. } => {
                ErrorKind::InvalidRequest
            }
            Error::Serialization(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Serializable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModelUnavailable,
    ModelRejected,
    StorageUnavailable,
    Storage,
    MemoryPersistFailed,
    PatternTerminationLimitReached,
    ToolFailed,
    Cancelled,
    InvalidRequest,
    Internal,
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// Transient: the provider could not serve the request right now.
    #[error("Model unavailable: {0}")]
    Unavailable(String),

    /// Terminal: the prompt was invalid or violated provider policy.
    #[error("Model rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Memory storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum EventStoreError {
    #[error("Event storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Sequence conflict for execution {execution_id}: expected {expected}, got {got}")]
    SequenceConflict {
        execution_id: String,
        expected: u64,
        got: u64,
    },

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_displays_correctly() {
        let err = Error::Model(ModelError::Unavailable("503 from upstream".into()));
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(Error::from(ModelError::Unavailable("x".into())).is_retryable());
        assert!(Error::from(MemoryError::StorageUnavailable("x".into())).is_retryable());
        assert!(Error::from(EventStoreError::StorageUnavailable("x".into())).is_retryable());

        assert!(!Error::from(ModelError::Rejected("policy".into())).is_retryable());
        assert!(!Error::from(MemoryError::QueryFailed("bad".into())).is_retryable());
        assert!(!Error::TerminationLimitReached { max_steps: 3 }.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn kinds_distinguish_gave_up_from_errored() {
        assert_eq!(
            Error::TerminationLimitReached { max_steps: 10 }.kind(),
            ErrorKind::PatternTerminationLimitReached
        );
        assert_eq!(
            Error::from(ModelError::Rejected("nope".into())).kind(),
            ErrorKind::ModelRejected
        );
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::PatternTerminationLimitReached).unwrap();
        assert_eq!(json, "\"pattern_termination_limit_reached\"");
    }
}

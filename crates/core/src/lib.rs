//! # Mindloop Core
//!
//! Domain types, traits, and error definitions for the mindloop reasoning
//! engine. This crate has **no backend dependencies**: it defines the domain
//! model that every other crate implements against.
//!
//! Each collaborator (model, memory, event log, tools) is a trait here.
//! Implementations live in their own crates, so tests can swap in mocks and
//! configuration can pick backends.

pub mod error;
pub mod event;
pub mod execution;
pub mod memory;
pub mod model;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, EventStoreError, MemoryError, ModelError, Result, ToolError};
pub use event::{Event, EventBus, EventKind, EventStore};
pub use execution::{
    Execution, ExecutionError, ExecutionResult, ExecutionStatus, ReasoningStep, StepKind,
    StepStatus,
};
pub use memory::{
    MemoryContent, MemoryKind, MemoryQuery, MemoryRecord, MemoryStore, RecallOrder,
    RelevanceRanker,
};
pub use model::{Generation, GenerationParams, ModelClient, Usage};
pub use tool::{Tool, ToolCall, ToolExecutor, ToolRegistry, ToolResult};

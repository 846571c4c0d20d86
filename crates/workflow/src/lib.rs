//! Workflow orchestration for mindloop.
//!
//! The [`Orchestrator`] owns execution state, selects and drives a pattern,
//! commits every step to the event store before the pattern moves on, and
//! applies the retry and cancellation policy.

mod driver;
pub mod orchestrator;
pub mod retry;

pub use orchestrator::{ExecutionSummary, Orchestrator, OrchestratorContext};
pub use retry::RetryPolicy;

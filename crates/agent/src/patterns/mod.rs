//! Workflow patterns: strategies that combine reasoning steps.
//!
//! 1. **Sequential Reflection**: Reason, then Reflect on it
//! 2. **Parallel Exploration**: K concurrent Reason branches, combined by a rule
//! 3. **Tool-Augmented Planning**: Reason ↔ tool calls until a final answer
//! 4. **Reflective Refinement**: Reason, then rounds of Reflect → Reason
//!
//! Patterns are stateless. They never touch storage: every step, tool call
//! and decision goes through a [`StepDriver`], which the orchestrator
//! implements to apply retries, cancellation and event recording.

pub mod parallel;
pub mod planning;
pub mod refinement;
pub mod sequential;

use async_trait::async_trait;
use mindloop_config::PatternsConfig;
use mindloop_core::error::{Error, Result};
use mindloop_core::execution::ReasoningStep;
use mindloop_core::memory::MemoryKind;
use mindloop_core::tool::{ToolCall, ToolResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use parallel::{CombinationRule, Combined, LabeledConcatenation, LowestUncertainty, ParallelExploration};
pub use planning::{Directive, OutputClassifier, ReactClassifier, ToolAugmentedPlanning};
pub use refinement::ReflectiveRefinement;
pub use sequential::SequentialReflection;

/// What a pattern hands back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternResult {
    pub final_output: String,
    /// Ids of the steps that produced the result, in order.
    pub step_sequence: Vec<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// The orchestrator-side surface a pattern drives.
///
/// Every method that runs a step returns only after the step's events are
/// committed. Each one checks for cancellation first and returns
/// `Error::Cancelled` when a cancel was requested.
#[async_trait]
pub trait StepDriver: Send + Sync {
    fn agent_id(&self) -> &str;

    fn execution_id(&self) -> &str;

    /// One `Reason` step under the retry policy.
    async fn reason(
        &self,
        context: &str,
        prompt: &str,
        memory_kind: MemoryKind,
    ) -> Result<ReasoningStep>;

    /// One `Reflect` step on `prior` under the retry policy.
    async fn reflect(&self, prior: &ReasoningStep) -> Result<ReasoningStep>;

    /// `branches` concurrent `Reason` steps sharing one memory snapshot taken
    /// at dispatch. Branch outcomes are returned in branch order.
    async fn explore(
        &self,
        context: &str,
        prompt: &str,
        branches: usize,
    ) -> Result<Vec<Result<ReasoningStep>>>;

    /// Run an external tool. Tool failures come back as `Error::Tool`.
    async fn execute_tool(&self, call: &ToolCall) -> Result<ToolResult>;

    /// `name: description` lines for every available tool.
    fn tool_descriptions(&self) -> Vec<String>;

    /// Record a pattern-level decision in the event log.
    async fn record_decision(&self, payload: serde_json::Value) -> Result<()>;
}

/// The one contract every pattern implements.
#[async_trait]
pub trait WorkflowPattern: Send + Sync {
    /// The name callers pass to `Execute`.
    fn name(&self) -> &str;

    async fn execute(&self, driver: &dyn StepDriver, prompt: &str) -> Result<PatternResult>;
}

/// Patterns by name.
#[derive(Clone, Default)]
pub struct PatternRegistry {
    patterns: BTreeMap<String, Arc<dyn WorkflowPattern>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in patterns, tuned by `config`.
    pub fn builtin(config: &PatternsConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(
            SequentialReflection::new().with_compiled_output(config.sequential.compile_output),
        ));
        registry.register(Arc::new(ParallelExploration::from_config(&config.parallel)));
        registry.register(Arc::new(
            ToolAugmentedPlanning::new().with_max_steps(config.planning.max_steps),
        ));
        registry.register(Arc::new(ReflectiveRefinement::new(config.refinement.rounds)));
        registry
    }

    /// Register a pattern. Replaces any existing pattern with the same name.
    pub fn register(&mut self, pattern: Arc<dyn WorkflowPattern>) {
        self.patterns.insert(pattern.name().to_string(), pattern);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn WorkflowPattern>> {
        self.patterns
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownPattern(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.patterns.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
pub(crate) mod test_helpers;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_names() {
        let registry = PatternRegistry::builtin(&PatternsConfig::default());
        assert_eq!(
            registry.names(),
            vec![
                "parallel-exploration",
                "reflective-refinement",
                "sequential-reflection",
                "tool-augmented-planning",
            ]
        );
    }

    #[test]
    fn unknown_pattern_is_an_error() {
        let registry = PatternRegistry::builtin(&PatternsConfig::default());
        assert!(matches!(
            registry.get("tree-of-thought"),
            Err(Error::UnknownPattern(name)) if name == "tree-of-thought"
        ));
    }
}

//! Parallel Exploration: K independent branches, one combined answer.
//!
//! All branches get the same prompt and the same memory snapshot, read once
//! at dispatch. Outcomes are combined by a fixed [`CombinationRule`] over
//! the successful branches in branch order, never by arrival order.
//!
//! One failed branch never aborts its siblings. The pattern fails only if
//! every branch fails, with the error of the highest-indexed branch.

use async_trait::async_trait;
use mindloop_config::{CombinationKind, ParallelConfig};
use mindloop_core::error::{Error, Result};
use mindloop_core::execution::ReasoningStep;
use std::sync::Arc;
use tracing::{info, warn};

use super::{PatternResult, StepDriver, WorkflowPattern};

/// The output of a combination rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Combined {
    pub output: String,
    /// The branch whose output was chosen, for selecting rules.
    pub selected_branch: Option<usize>,
}

/// A deterministic way to merge successful branches.
pub trait CombinationRule: Send + Sync {
    fn name(&self) -> &str;

    /// `branches` is non-empty and ordered by branch index.
    fn combine(&self, branches: &[(usize, &ReasoningStep)]) -> Combined;
}

/// Pick the branch with the lowest model-reported uncertainty.
///
/// A missing uncertainty counts as 1.0. Ties go to the lowest branch index.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowestUncertainty;

impl CombinationRule for LowestUncertainty {
    fn name(&self) -> &str {
        "lowest_uncertainty"
    }

    fn combine(&self, branches: &[(usize, &ReasoningStep)]) -> Combined {
        let mut best: Option<(usize, &ReasoningStep, f32)> = None;
        for &(index, step) in branches {
            let score = step.uncertainty.unwrap_or(1.0);
            // Strict `<` keeps the earliest branch on ties.
            if best.is_none_or(|(_, _, s)| score < s) {
                best = Some((index, step, score));
            }
        }
        match best {
            Some((index, step, _)) => Combined {
                output: step.output.clone(),
                selected_branch: Some(index),
            },
            None => Combined {
                output: String::new(),
                selected_branch: None,
            },
        }
    }
}

/// Every branch output under a `[branch N]` label, in branch order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabeledConcatenation;

impl CombinationRule for LabeledConcatenation {
    fn name(&self) -> &str {
        "labeled_concatenation"
    }

    fn combine(&self, branches: &[(usize, &ReasoningStep)]) -> Combined {
        let blocks: Vec<String> = branches
            .iter()
            .map(|(index, step)| format!("[branch {index}]\n{}", step.output))
            .collect();
        Combined {
            output: blocks.join("\n\n"),
            selected_branch: None,
        }
    }
}

pub struct ParallelExploration {
    branches: usize,
    rule: Arc<dyn CombinationRule>,
}

impl ParallelExploration {
    pub fn new(branches: usize, rule: Arc<dyn CombinationRule>) -> Self {
        Self {
            branches: branches.max(1),
            rule,
        }
    }

    pub fn from_config(config: &ParallelConfig) -> Self {
        let rule: Arc<dyn CombinationRule> = match config.combination {
            CombinationKind::LowestUncertainty => Arc::new(LowestUncertainty),
            CombinationKind::LabeledConcatenation => Arc::new(LabeledConcatenation),
        };
        Self::new(config.branches, rule)
    }
}

#[async_trait]
impl WorkflowPattern for ParallelExploration {
    fn name(&self) -> &str {
        "parallel-exploration"
    }

    async fn execute(&self, driver: &dyn StepDriver, prompt: &str) -> Result<PatternResult> {
        let outcomes = driver.explore("", prompt, self.branches).await?;

        let mut succeeded: Vec<(usize, ReasoningStep)> = Vec::new();
        let mut last_error: Option<Error> = None;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(step) => succeeded.push((index, step)),
                Err(e) => {
                    warn!(branch = index, error = %e, "Branch failed");
                    last_error = Some(e);
                }
            }
        }

        if succeeded.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| Error::Internal("parallel exploration ran no branches".into())));
        }

        let refs: Vec<(usize, &ReasoningStep)> =
            succeeded.iter().map(|(i, s)| (*i, s)).collect();
        let combined = self.rule.combine(&refs);
        let succeeded_branches: Vec<usize> = succeeded.iter().map(|(i, _)| *i).collect();

        info!(
            succeeded = succeeded.len(),
            total = self.branches,
            rule = self.rule.name(),
            "Combining branches"
        );

        driver
            .record_decision(serde_json::json!({
                "decision": "combine_branches",
                "rule": self.rule.name(),
                "branches": self.branches,
                "succeeded": succeeded_branches,
                "selected_branch": combined.selected_branch,
            }))
            .await?;

        Ok(PatternResult {
            final_output: combined.output,
            details: serde_json::json!({
                "rule": self.rule.name(),
                "succeeded": succeeded_branches,
                "selected_branch": combined.selected_branch,
            }),
            step_sequence: succeeded.into_iter().map(|(_, s)| s.step_id).collect(),
        })
    }
}

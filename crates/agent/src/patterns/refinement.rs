//! Reflective Refinement: Reason, then `rounds` of Reflect → Reason.
//!
//! Each round critiques the current answer and asks for a revised one with
//! the critique in context. The last revision is the final output.

use async_trait::async_trait;
use mindloop_core::error::Result;
use mindloop_core::memory::MemoryKind;
use tracing::debug;

use super::{PatternResult, StepDriver, WorkflowPattern};

#[derive(Debug, Clone)]
pub struct ReflectiveRefinement {
    rounds: usize,
}

impl ReflectiveRefinement {
    pub fn new(rounds: usize) -> Self {
        Self { rounds }
    }
}

#[async_trait]
impl WorkflowPattern for ReflectiveRefinement {
    fn name(&self) -> &str {
        "reflective-refinement"
    }

    async fn execute(&self, driver: &dyn StepDriver, prompt: &str) -> Result<PatternResult> {
        let mut current = driver.reason("", prompt, MemoryKind::Observation).await?;
        let mut step_sequence = vec![current.step_id.clone()];
        let mut critiques = Vec::with_capacity(self.rounds);

        for round in 1..=self.rounds {
            debug!(round, execution_id = %driver.execution_id(), "Refinement round");
            let critique = driver.reflect(&current).await?;
            step_sequence.push(critique.step_id.clone());

            let context = format!(
                "## Previous answer\n{}\n\n## Critique\n{}",
                current.output, critique.output
            );
            current = driver.reason(&context, prompt, MemoryKind::Observation).await?;
            step_sequence.push(current.step_id.clone());
            critiques.push(critique.output);
        }

        Ok(PatternResult {
            final_output: current.output,
            details: serde_json::json!({
                "rounds": self.rounds,
                "critiques": critiques,
            }),
            step_sequence,
        })
    }
}

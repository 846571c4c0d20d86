//! Sequential Reflection: Reason, then Reflect on the result.
//!
//! A fixed two-step state machine:
//!
//! ```text
//! Initial ──Reason──▶ Reasoned ──Reflect──▶ Reflected (terminal)
//! ```
//!
//! The final output is the reflection, or both outputs compiled together
//! when `compile_output` is on. Reflected is terminal whatever it contains.

use async_trait::async_trait;
use mindloop_core::error::Result;
use mindloop_core::execution::ReasoningStep;
use mindloop_core::memory::MemoryKind;
use tracing::debug;

use super::{PatternResult, StepDriver, WorkflowPattern};

enum State {
    Initial,
    Reasoned(ReasoningStep),
    Reflected {
        reasoning: ReasoningStep,
        reflection: ReasoningStep,
    },
}

#[derive(Debug, Clone, Default)]
pub struct SequentialReflection {
    compile_output: bool,
}

impl SequentialReflection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return both outputs instead of only the reflection.
    pub fn with_compiled_output(mut self, enabled: bool) -> Self {
        self.compile_output = enabled;
        self
    }

    fn finish(&self, reasoning: ReasoningStep, reflection: ReasoningStep) -> PatternResult {
        let final_output = if self.compile_output {
            format!(
                "## Reasoning\n{}\n\n## Reflection\n{}",
                reasoning.output, reflection.output
            )
        } else {
            reflection.output.clone()
        };
        PatternResult {
            final_output,
            details: serde_json::json!({
                "reasoning": reasoning.output,
                "reflection": reflection.output,
            }),
            step_sequence: vec![reasoning.step_id, reflection.step_id],
        }
    }
}

#[async_trait]
impl WorkflowPattern for SequentialReflection {
    fn name(&self) -> &str {
        "sequential-reflection"
    }

    async fn execute(&self, driver: &dyn StepDriver, prompt: &str) -> Result<PatternResult> {
        let mut state = State::Initial;
        loop {
            state = match state {
                State::Initial => {
                    State::Reasoned(driver.reason("", prompt, MemoryKind::Observation).await?)
                }
                State::Reasoned(reasoning) => {
                    debug!(execution_id = %driver.execution_id(), "Reflecting on first step");
                    let reflection = driver.reflect(&reasoning).await?;
                    State::Reflected {
                        reasoning,
                        reflection,
                    }
                }
                State::Reflected {
                    reasoning,
                    reflection,
                } => return Ok(self.finish(reasoning, reflection)),
            };
        }
    }
}

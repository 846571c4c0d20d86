//! Tool-Augmented Planning: ReAct-style Thought → Action → Observation.
//!
//! Each iteration runs one `Reason` step whose context is the scratchpad of
//! everything seen so far. The output is classified as a final answer, a
//! tool call, or neither. Tool observations are appended to the scratchpad
//! for the next step.
//!
//! The loop is bounded by `max_steps` Reason steps. Hitting the bound is a
//! distinct failure (`TerminationLimitReached`), not an error of any step.

use async_trait::async_trait;
use mindloop_core::error::{Error, Result};
use mindloop_core::memory::MemoryKind;
use mindloop_core::tool::ToolCall;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{PatternResult, StepDriver, WorkflowPattern};

/// What a Reason step asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    FinalAnswer(String),
    ToolCall(ToolCall),
    NoDirective,
}

/// Decides what a step's output means.
pub trait OutputClassifier: Send + Sync {
    fn classify(&self, output: &str) -> Directive;
}

/// Parses the classic ReAct text format:
///
/// ```text
/// Thought: I should add the numbers.
/// Action: calculator
/// Action Input: {"expression": "2 + 2"}
/// ```
///
/// or `Final Answer: ...`. Whichever marker appears first wins. An
/// `Action Input` that is not JSON is passed through as a string.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReactClassifier;

const FINAL_ANSWER: &str = "Final Answer:";
const ACTION: &str = "Action:";
const ACTION_INPUT: &str = "Action Input:";

impl OutputClassifier for ReactClassifier {
    fn classify(&self, output: &str) -> Directive {
        let lines: Vec<&str> = output.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            let trimmed = line.trim_start();
            if let Some(rest) = trimmed.strip_prefix(FINAL_ANSWER) {
                let mut answer = vec![rest.trim()];
                answer.extend(lines[i + 1..].iter().copied());
                return Directive::FinalAnswer(answer.join("\n").trim().to_string());
            }
            if let Some(name) = trimmed.strip_prefix(ACTION) {
                let name = name.trim();
                if name.is_empty() {
                    return Directive::NoDirective;
                }
                let arguments = lines[i + 1..]
                    .iter()
                    .find_map(|l| l.trim_start().strip_prefix(ACTION_INPUT))
                    .map(|raw| parse_arguments(raw.trim()))
                    .unwrap_or(serde_json::Value::Null);
                return Directive::ToolCall(ToolCall::new(name, arguments));
            }
        }
        Directive::NoDirective
    }
}

fn parse_arguments(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

pub struct ToolAugmentedPlanning {
    max_steps: usize,
    classifier: Arc<dyn OutputClassifier>,
}

impl Default for ToolAugmentedPlanning {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolAugmentedPlanning {
    pub fn new() -> Self {
        Self {
            max_steps: 10,
            classifier: Arc::new(ReactClassifier),
        }
    }

    /// Hard upper bound on Reason steps. Clamped to at least one.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn OutputClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    fn instructions(tools: &[String]) -> String {
        let listing = if tools.is_empty() {
            "(no tools available)".to_string()
        } else {
            tools
                .iter()
                .map(|t| format!("- {t}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "You can use these tools:\n{listing}\n\n\
             To use a tool, reply with:\nAction: <tool name>\nAction Input: <JSON arguments>\n\n\
             When you know the answer, reply with:\nFinal Answer: <answer>"
        )
    }
}

#[async_trait]
impl WorkflowPattern for ToolAugmentedPlanning {
    fn name(&self) -> &str {
        "tool-augmented-planning"
    }

    async fn execute(&self, driver: &dyn StepDriver, prompt: &str) -> Result<PatternResult> {
        let instructions = Self::instructions(&driver.tool_descriptions());
        let mut scratchpad: Vec<String> = Vec::new();
        let mut step_sequence = Vec::new();
        let mut tool_calls = 0usize;

        for iteration in 1..=self.max_steps {
            let context = if scratchpad.is_empty() {
                instructions.clone()
            } else {
                format!("{instructions}\n\n## Scratchpad\n{}", scratchpad.join("\n"))
            };

            let step = driver.reason(&context, prompt, MemoryKind::Observation).await?;
            step_sequence.push(step.step_id.clone());

            match self.classifier.classify(&step.output) {
                Directive::FinalAnswer(answer) => {
                    info!(iterations = iteration, tool_calls, "Planning reached a final answer");
                    return Ok(PatternResult {
                        final_output: answer,
                        details: serde_json::json!({
                            "iterations": iteration,
                            "tool_calls": tool_calls,
                        }),
                        step_sequence,
                    });
                }
                Directive::ToolCall(call) => {
                    tool_calls += 1;
                    debug!(tool = %call.name, iteration, "Planning requested a tool");
                    let observation = match driver.execute_tool(&call).await {
                        Ok(result) => result.output,
                        Err(Error::Tool(e)) => {
                            warn!(tool = %call.name, error = %e, "Tool call failed");
                            format!("Error: {e}")
                        }
                        Err(e) => return Err(e),
                    };
                    scratchpad.push(step.output.trim().to_string());
                    scratchpad.push(format!("Observation: {observation}"));
                }
                Directive::NoDirective => {
                    scratchpad.push(step.output.trim().to_string());
                    scratchpad.push(
                        "Observation: no action or final answer found. Use the format above."
                            .to_string(),
                    );
                }
            }
        }

        warn!(max_steps = self.max_steps, "Planning hit its step limit");
        Err(Error::TerminationLimitReached {
            max_steps: self.max_steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::{DirectDriver, ScriptedModel};
    use mindloop_core::error::ToolError;
    use mindloop_core::tool::{Tool, ToolRegistry, ToolResult};

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercases text"
        }
        async fn execute(
            &self,
            _agent_id: &str,
            arguments: serde_json::Value,
        ) -> std::result::Result<ToolResult, ToolError> {
            match arguments["text"].as_str() {
                Some(text) => Ok(ToolResult::ok(text.to_uppercase())),
                None => Err(ToolError::InvalidArguments("missing text".into())),
            }
        }
    }

    #[test]
    fn classifier_reads_final_answer() {
        let d = ReactClassifier.classify("Thought: easy.\nFinal Answer: 42\nthat's it");
        assert_eq!(d, Directive::FinalAnswer("42\nthat's it".into()));
    }

    #[test]
    fn classifier_reads_action_with_json_input() {
        let d = ReactClassifier.classify("Action: upper\nAction Input: {\"text\": \"hi\"}");
        assert_eq!(
            d,
            Directive::ToolCall(ToolCall::new("upper", serde_json::json!({"text": "hi"})))
        );
    }

    #[test]
    fn classifier_keeps_plain_input_as_string() {
        let d = ReactClassifier.classify("Action: calculator\nAction Input: 2 + 2");
        assert_eq!(
            d,
            Directive::ToolCall(ToolCall::new("calculator", serde_json::json!("2 + 2")))
        );
    }

    #[test]
    fn classifier_without_markers() {
        assert_eq!(ReactClassifier.classify("just musing"), Directive::NoDirective);
    }

    #[tokio::test]
    async fn tool_observation_feeds_next_step() {
        let model = Arc::new(ScriptedModel::texts(&[
            "Action: upper\nAction Input: {\"text\": \"quiet\"}",
            "Final Answer: QUIET",
        ]));
        let tools = ToolRegistry::new().with(Arc::new(UpperTool));
        let driver = DirectDriver::with_tools(model.clone(), tools);

        let result = ToolAugmentedPlanning::new().execute(&driver, "shout it").await.unwrap();
        assert_eq!(result.final_output, "QUIET");
        assert_eq!(result.step_sequence.len(), 2);
        assert_eq!(result.details["tool_calls"], 1);

        let second = &model.prompts()[1];
        assert!(second.contains("- upper: Uppercases text"));
        assert!(second.contains("Observation: QUIET"));
    }

    #[tokio::test]
    async fn tool_errors_become_observations() {
        let model = Arc::new(ScriptedModel::texts(&[
            "Action: missing_tool\nAction Input: {}",
            "Final Answer: gave up on the tool",
        ]));
        let driver = DirectDriver::new(model.clone());

        let result = ToolAugmentedPlanning::new().execute(&driver, "p").await.unwrap();
        assert_eq!(result.final_output, "gave up on the tool");
        assert!(model.prompts()[1].contains("Observation: Error: Tool not found: missing_tool"));
    }

    #[tokio::test]
    async fn step_cap_is_a_distinct_failure() {
        let model = Arc::new(ScriptedModel::texts(&["still thinking"]));
        let driver = DirectDriver::new(model.clone());

        let err = ToolAugmentedPlanning::new()
            .with_max_steps(3)
            .execute(&driver, "p")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TerminationLimitReached { max_steps: 3 }));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn custom_classifier_is_used() {
        struct Always;
        impl OutputClassifier for Always {
            fn classify(&self, output: &str) -> Directive {
                Directive::FinalAnswer(output.to_string())
            }
        }

        let model = Arc::new(ScriptedModel::texts(&["anything"]));
        let driver = DirectDriver::new(model);
        let result = ToolAugmentedPlanning::new()
            .with_classifier(Arc::new(Always))
            .execute(&driver, "p")
            .await
            .unwrap();
        assert_eq!(result.final_output, "anything");
    }
}

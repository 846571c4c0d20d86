//! Execution and reasoning-step records.
//!
//! An [`Execution`] is one end-to-end run of a workflow pattern. It is owned
//! exclusively by the orchestrator; patterns only reach it through the
//! orchestrator's step driver.
//!
//! State machine: `Pending → Running → {Completed | Failed | Cancelled}`.
//! Terminal states are final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::model::Usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Which engine operation produced a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Reason,
    Reflect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// One atomic contextualize → generate → persist cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step_id: String,
    pub agent_id: String,
    pub execution_id: String,
    pub kind: StepKind,
    pub status: StepStatus,

    /// The fully contextualized text sent to the model.
    pub prompt: String,

    /// The model response. Empty for failed steps.
    #[serde(default)]
    pub output: String,

    /// Ids of the memory records consulted, in retrieval order.
    #[serde(default)]
    pub memories_used: Vec<String>,

    /// Id of the memory record this step wrote, if persistence succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,

    /// Generation succeeded but the memory write did not.
    #[serde(default)]
    pub memory_persist_failed: bool,

    /// Parallel branch index, when the step ran as one of several branches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<usize>,

    /// 1-based attempt number under the retry policy.
    #[serde(default = "default_attempt")]
    pub attempt: u32,

    #[serde(default)]
    pub usage: Usage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_attempt() -> u32 {
    1
}

impl ReasoningStep {
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    /// A failed-attempt record for the audit trail.
    pub fn failed(
        agent_id: &str,
        execution_id: &str,
        kind: StepKind,
        attempt: u32,
        started_at: DateTime<Utc>,
        error: String,
    ) -> Self {
        Self {
            step_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            execution_id: execution_id.to_string(),
            kind,
            status: StepStatus::Failed,
            prompt: String::new(),
            output: String::new(),
            memories_used: Vec::new(),
            memory_id: None,
            memory_persist_failed: false,
            branch: None,
            attempt,
            usage: Usage::default(),
            uncertainty: None,
            error: Some(error),
            started_at,
            completed_at: Some(Utc::now()),
        }
    }
}

/// The final output of a completed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,

    /// Pattern-specific structured detail (e.g. the reasoning and the reflection).
    #[serde(default)]
    pub details: serde_json::Value,
}

/// The terminal cause of a failed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,

    /// Index into `Execution::steps` of the last completed step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed_step: Option<usize>,
}

/// One end-to-end run of a workflow pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: String,
    pub agent_id: String,
    pub pattern_name: String,
    pub prompt: String,
    pub status: ExecutionStatus,

    /// Completed reasoning step ids, in commit order.
    #[serde(default)]
    pub steps: Vec<String>,

    /// Every step record, completed and failed attempts alike.
    #[serde(default)]
    pub records: Vec<ReasoningStep>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    /// A new execution in `Pending`.
    pub fn new(
        agent_id: impl Into<String>,
        pattern_name: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            pattern_name: pattern_name.into(),
            prompt: prompt.into(),
            status: ExecutionStatus::Pending,
            steps: Vec::new(),
            records: Vec::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `Pending → Running`. Returns whether the transition happened.
    pub fn mark_running(&mut self) -> bool {
        if self.status != ExecutionStatus::Pending {
            return false;
        }
        self.status = ExecutionStatus::Running;
        self.touch();
        true
    }

    /// Record a completed step and commit its id to `steps`.
    pub fn append_step(&mut self, step: ReasoningStep) {
        if step.is_completed() {
            self.steps.push(step.step_id.clone());
        }
        self.records.push(step);
        self.touch();
    }

    /// Index of the last completed step, if any.
    pub fn last_completed_step(&self) -> Option<usize> {
        self.steps.len().checked_sub(1)
    }

    pub fn complete(&mut self, result: ExecutionResult) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ExecutionStatus::Completed;
        self.result = Some(result);
        self.touch();
        true
    }

    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let mut message = message.into();
        if message.is_empty() {
            message = format!("{kind:?}");
        }
        self.status = ExecutionStatus::Failed;
        self.error = Some(ExecutionError {
            kind,
            message,
            last_completed_step: self.last_completed_step(),
        });
        self.touch();
        true
    }

    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ExecutionStatus::Cancelled;
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_step(execution: &Execution) -> ReasoningStep {
        ReasoningStep {
            step_id: Uuid::new_v4().to_string(),
            agent_id: execution.agent_id.clone(),
            execution_id: execution.execution_id.clone(),
            kind: StepKind::Reason,
            status: StepStatus::Completed,
            prompt: "p".into(),
            output: "o".into(),
            memories_used: vec![],
            memory_id: None,
            memory_persist_failed: false,
            branch: None,
            attempt: 1,
            usage: Usage::default(),
            uncertainty: None,
            error: None,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn new_execution_is_pending() {
        let execution = Execution::new("a1", "sequential-reflection", "summarize X");
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert!(execution.steps.is_empty());
        assert!(!execution.execution_id.is_empty());
    }

    #[test]
    fn running_only_from_pending() {
        let mut execution = Execution::new("a1", "p", "x");
        assert!(execution.mark_running());
        assert!(!execution.mark_running());
        assert_eq!(execution.status, ExecutionStatus::Running);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut execution = Execution::new("a1", "p", "x");
        execution.mark_running();
        assert!(execution.cancel());
        assert!(!execution.complete(ExecutionResult {
            output: "late".into(),
            details: serde_json::Value::Null,
        }));
        assert!(!execution.fail(ErrorKind::Internal, "late"));
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert!(execution.result.is_none());
    }

    #[test]
    fn failed_steps_are_recorded_but_not_committed() {
        let mut execution = Execution::new("a1", "p", "x");
        let failed = ReasoningStep::failed(
            "a1",
            &execution.execution_id,
            StepKind::Reason,
            1,
            Utc::now(),
            "unavailable".into(),
        );
        execution.append_step(failed);
        let ok = completed_step(&execution);
        execution.append_step(ok);

        assert_eq!(execution.records.len(), 2);
        assert_eq!(execution.steps.len(), 1);
        assert_eq!(execution.last_completed_step(), Some(0));
    }

    #[test]
    fn failure_carries_last_completed_step() {
        let mut execution = Execution::new("a1", "p", "x");
        execution.mark_running();
        let step = completed_step(&execution);
        execution.append_step(step);
        execution.fail(ErrorKind::ModelRejected, "policy violation");

        let error = execution.error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::ModelRejected);
        assert_eq!(error.last_completed_step, Some(0));
        assert!(!error.message.is_empty());
    }
}

//! The reasoning engine: one contextualize → generate → persist cycle.
//!
//! 1. **Recall** up to `recall_limit` memories for the agent
//! 2. **Contextualize**: deterministic concatenation of preamble, caller
//!    context, recalled memories (in retrieval order) and the task
//! 3. **Generate** via the model client
//! 4. **Persist** the output as a new memory record tagged with the step
//!
//! A model failure leaves no memory behind. A memory write failure after a
//! successful generation still returns the step, flagged
//! `memory_persist_failed`; the output is never thrown away.

use chrono::Utc;
use mindloop_core::error::{Error, MemoryError};
use mindloop_core::execution::{ReasoningStep, StepKind, StepStatus};
use mindloop_core::memory::{
    MemoryContent, MemoryKind, MemoryQuery, MemoryRecord, MemoryStore, RecallOrder,
};
use mindloop_core::model::{GenerationParams, ModelClient};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Everything needed to run one step.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub agent_id: String,
    pub execution_id: String,
    pub kind: StepKind,
    /// Type tag of the memory written for this step.
    pub memory_kind: MemoryKind,
    /// Caller-supplied context placed ahead of the memories.
    pub context: String,
    /// The task text. Also the relevance query for recall.
    pub prompt: String,
    pub branch: Option<usize>,
}

impl StepRequest {
    pub fn reason(
        agent_id: impl Into<String>,
        execution_id: impl Into<String>,
        context: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            execution_id: execution_id.into(),
            kind: StepKind::Reason,
            memory_kind: MemoryKind::Observation,
            context: context.into(),
            prompt: prompt.into(),
            branch: None,
        }
    }

    pub fn with_memory_kind(mut self, kind: MemoryKind) -> Self {
        self.memory_kind = kind;
        self
    }

    pub fn with_branch(mut self, branch: usize) -> Self {
        self.branch = Some(branch);
        self
    }
}

pub struct ReasoningEngine {
    model: Arc<dyn ModelClient>,
    memory: Arc<dyn MemoryStore>,
    params: GenerationParams,
    recall_limit: usize,
    recall_order: RecallOrder,
    preamble: String,
    reflection_instruction: String,
}

impl ReasoningEngine {
    pub fn new(model: Arc<dyn ModelClient>, memory: Arc<dyn MemoryStore>) -> Self {
        Self {
            model,
            memory,
            params: GenerationParams::default(),
            recall_limit: 5,
            recall_order: RecallOrder::default(),
            preamble: String::new(),
            reflection_instruction:
                "Critique the following answer. Point out mistakes and gaps, then give an improved answer."
                    .into(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_recall(mut self, limit: usize, order: RecallOrder) -> Self {
        self.recall_limit = limit;
        self.recall_order = order;
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }

    pub fn with_reflection_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.reflection_instruction = instruction.into();
        self
    }

    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.memory
    }

    /// `Reason`: recall, contextualize, generate, persist.
    pub async fn reason(
        &self,
        agent_id: &str,
        execution_id: &str,
        context: &str,
        prompt: &str,
    ) -> Result<ReasoningStep, Error> {
        self.execute(&StepRequest::reason(agent_id, execution_id, context, prompt))
            .await
    }

    /// `Reflect`: a step whose task is a critique of `prior`.
    pub async fn reflect(
        &self,
        agent_id: &str,
        execution_id: &str,
        prior: &ReasoningStep,
    ) -> Result<ReasoningStep, Error> {
        self.execute(&self.reflection_request(agent_id, execution_id, prior))
            .await
    }

    /// The request `reflect` would run for `prior`.
    pub fn reflection_request(
        &self,
        agent_id: &str,
        execution_id: &str,
        prior: &ReasoningStep,
    ) -> StepRequest {
        StepRequest {
            agent_id: agent_id.to_string(),
            execution_id: execution_id.to_string(),
            kind: StepKind::Reflect,
            memory_kind: MemoryKind::Reflection,
            context: String::new(),
            prompt: format!("{}\n\n{}", self.reflection_instruction, prior.output),
            branch: prior.branch,
        }
    }

    /// Recall, then run the step.
    pub async fn execute(&self, request: &StepRequest) -> Result<ReasoningStep, Error> {
        let memories = self.recall(&request.agent_id, &request.prompt).await?;
        self.execute_with_memories(request, &memories).await
    }

    /// Memories for a step, per the configured limit and order.
    pub async fn recall(
        &self,
        agent_id: &str,
        query_text: &str,
    ) -> Result<Vec<MemoryRecord>, Error> {
        let query = MemoryQuery {
            kind: None,
            limit: self.recall_limit,
            order: self.recall_order,
            text: Some(query_text.to_string()),
        };
        Ok(self.memory.retrieve(agent_id, &query).await?)
    }

    /// Run a step against an already-taken memory snapshot.
    pub async fn execute_with_memories(
        &self,
        request: &StepRequest,
        memories: &[MemoryRecord],
    ) -> Result<ReasoningStep, Error> {
        let started_at = Utc::now();
        let prompt = self.build_prompt(&request.context, memories, &request.prompt);

        debug!(
            agent_id = %request.agent_id,
            execution_id = %request.execution_id,
            kind = ?request.kind,
            memories = memories.len(),
            "Generating reasoning step"
        );

        let generation = self.model.generate(&prompt, &self.params).await?;

        let mut step = ReasoningStep {
            step_id: Uuid::new_v4().to_string(),
            agent_id: request.agent_id.clone(),
            execution_id: request.execution_id.clone(),
            kind: request.kind,
            status: StepStatus::Completed,
            prompt,
            output: generation.text,
            memories_used: memories.iter().map(|m| m.id().to_string()).collect(),
            memory_id: None,
            memory_persist_failed: false,
            branch: request.branch,
            attempt: 1,
            usage: generation.usage,
            uncertainty: generation.uncertainty,
            error: None,
            started_at,
            completed_at: None,
        };

        match self.persist(&step, request.memory_kind.clone(), &request.prompt).await {
            Ok(record) => step.memory_id = Some(record.id().to_string()),
            Err(e) => {
                warn!(step_id = %step.step_id, error = %e, "Step output not persisted to memory");
                step.memory_persist_failed = true;
            }
        }
        step.completed_at = Some(Utc::now());
        Ok(step)
    }

    /// Write a step's output as a memory record.
    pub async fn persist(
        &self,
        step: &ReasoningStep,
        kind: MemoryKind,
        task: &str,
    ) -> Result<MemoryRecord, MemoryError> {
        let mut content = MemoryContent::new();
        content.insert("text".into(), step.output.clone().into());
        content.insert("step_id".into(), step.step_id.clone().into());
        content.insert("execution_id".into(), step.execution_id.clone().into());
        content.insert("prompt".into(), task.into());
        if let Some(branch) = step.branch {
            content.insert("branch".into(), branch.into());
        }
        self.memory.store(&step.agent_id, kind, content).await
    }

    /// Deterministic prompt assembly. Empty sections are omitted.
    pub fn build_prompt(&self, context: &str, memories: &[MemoryRecord], task: &str) -> String {
        let mut sections: Vec<String> = Vec::new();
        if !self.preamble.is_empty() {
            sections.push(self.preamble.clone());
        }
        if !context.is_empty() {
            sections.push(context.to_string());
        }
        if !memories.is_empty() {
            let lines: Vec<String> = memories
                .iter()
                .map(|m| format!("- [{}] {}", m.kind(), m.text()))
                .collect();
            sections.push(format!("## Relevant memories\n{}", lines.join("\n")));
        }
        sections.push(format!("## Task\n{task}"));
        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::{FailingMemory, ScriptedModel};
    use mindloop_core::error::ModelError;
    use mindloop_memory::InMemoryStore;

    fn engine(model: Arc<ScriptedModel>, memory: Arc<dyn MemoryStore>) -> ReasoningEngine {
        ReasoningEngine::new(model, memory)
    }

    #[tokio::test]
    async fn reason_persists_an_observation() {
        let model = Arc::new(ScriptedModel::texts(&["draft"]));
        let memory = Arc::new(InMemoryStore::new());
        let engine = engine(model.clone(), memory.clone());

        let step = engine.reason("a1", "e1", "", "summarize X").await.unwrap();
        assert_eq!(step.output, "draft");
        assert!(!step.memory_persist_failed);

        let record = memory.get(step.memory_id.as_deref().unwrap()).await.unwrap().unwrap();
        assert_eq!(record.kind(), &MemoryKind::Observation);
        assert_eq!(record.text(), "draft");
        assert_eq!(record.content()["step_id"], step.step_id.as_str());
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn memories_are_injected_in_retrieval_order() {
        let model = Arc::new(ScriptedModel::texts(&["first", "second", "third"]));
        let memory = Arc::new(InMemoryStore::new());
        let engine = engine(model.clone(), memory.clone());

        let s1 = engine.reason("a1", "e1", "", "one").await.unwrap();
        let s2 = engine.reason("a1", "e1", "", "two").await.unwrap();
        let s3 = engine.reason("a1", "e1", "ctx", "three").await.unwrap();

        assert_eq!(
            s3.memories_used,
            vec![s2.memory_id.clone().unwrap(), s1.memory_id.clone().unwrap()]
        );
        let prompt = &model.prompts()[2];
        assert!(prompt.starts_with("ctx\n\n## Relevant memories"));
        let second = prompt.find("second").unwrap();
        let first = prompt.find("- [observation] first").unwrap();
        assert!(second < first);
        assert!(prompt.ends_with("## Task\nthree"));
    }

    #[tokio::test]
    async fn model_failure_writes_no_memory() {
        let model = Arc::new(ScriptedModel::new(vec![Err(ModelError::Unavailable(
            "503".into(),
        ))]));
        let memory = Arc::new(InMemoryStore::new());
        let engine = engine(model, memory.clone());

        let err = engine.reason("a1", "e1", "", "x").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(memory.count("a1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn store_failure_keeps_the_output() {
        let model = Arc::new(ScriptedModel::texts(&["kept"]));
        let engine = engine(model, Arc::new(FailingMemory::default()));

        let step = engine.reason("a1", "e1", "", "x").await.unwrap();
        assert_eq!(step.output, "kept");
        assert!(step.memory_persist_failed);
        assert!(step.memory_id.is_none());
    }

    #[tokio::test]
    async fn reflect_tags_reflection_and_quotes_prior() {
        let model = Arc::new(ScriptedModel::texts(&["draft", "refined draft"]));
        let memory = Arc::new(InMemoryStore::new());
        let engine = engine(model.clone(), memory.clone())
            .with_reflection_instruction("Improve this:");

        let prior = engine.reason("a1", "e1", "", "summarize X").await.unwrap();
        let reflection = engine.reflect("a1", "e1", &prior).await.unwrap();

        assert_eq!(reflection.kind, StepKind::Reflect);
        assert!(model.prompts()[1].contains("Improve this:\n\ndraft"));
        let record = memory
            .get(reflection.memory_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.kind(), &MemoryKind::Reflection);
    }

    #[test]
    fn build_prompt_is_deterministic() {
        let engine = ReasoningEngine::new(
            Arc::new(ScriptedModel::texts(&[])),
            Arc::new(InMemoryStore::new()),
        )
        .with_preamble("You are careful.");
        let a = engine.build_prompt("ctx", &[], "task");
        let b = engine.build_prompt("ctx", &[], "task");
        assert_eq!(a, b);
        assert_eq!(a, "You are careful.\n\nctx\n\n## Task\ntask");
    }
}

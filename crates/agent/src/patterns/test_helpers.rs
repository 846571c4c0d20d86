//! Shared test helpers for engine and pattern tests.

use async_trait::async_trait;
use mindloop_core::error::{Error, MemoryError, ModelError, Result};
use mindloop_core::execution::ReasoningStep;
use mindloop_core::memory::{
    MemoryContent, MemoryKind, MemoryQuery, MemoryRecord, MemoryStore,
};
use mindloop_core::model::{Generation, GenerationParams, ModelClient};
use mindloop_core::tool::{ToolCall, ToolExecutor, ToolRegistry, ToolResult};
use mindloop_memory::InMemoryStore;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::StepDriver;
use crate::engine::{ReasoningEngine, StepRequest};

/// A model that replays a script of outcomes, one per call.
///
/// Once the script runs out, the last entry repeats.
pub struct ScriptedModel {
    script: Mutex<VecDeque<std::result::Result<Generation, ModelError>>>,
    last: Mutex<Option<std::result::Result<Generation, ModelError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<std::result::Result<Generation, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(Generation::text(*t))).collect())
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> std::result::Result<Generation, ModelError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(outcome) => {
                *last = Some(outcome.clone());
                outcome
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(ModelError::Rejected("script is empty".into()))),
        }
    }
}

/// A memory store whose writes always fail.
#[derive(Default)]
pub struct FailingMemory;

#[async_trait]
impl MemoryStore for FailingMemory {
    fn name(&self) -> &str {
        "failing"
    }

    async fn store(
        &self,
        _agent_id: &str,
        _kind: MemoryKind,
        _content: MemoryContent,
    ) -> std::result::Result<MemoryRecord, MemoryError> {
        Err(MemoryError::StorageUnavailable("disk full".into()))
    }

    async fn retrieve(
        &self,
        _agent_id: &str,
        _query: &MemoryQuery,
    ) -> std::result::Result<Vec<MemoryRecord>, MemoryError> {
        Ok(vec![])
    }

    async fn get(&self, _id: &str) -> std::result::Result<Option<MemoryRecord>, MemoryError> {
        Ok(None)
    }

    async fn count(&self, _agent_id: &str) -> std::result::Result<usize, MemoryError> {
        Ok(0)
    }
}

/// A driver that calls the engine directly: no retries, no events.
pub struct DirectDriver {
    pub engine: ReasoningEngine,
    pub tools: ToolRegistry,
    pub decisions: Mutex<Vec<serde_json::Value>>,
    pub tool_calls: Mutex<Vec<ToolCall>>,
}

impl DirectDriver {
    pub fn new(model: Arc<ScriptedModel>) -> Self {
        Self::with_tools(model, ToolRegistry::new())
    }

    pub fn with_tools(model: Arc<ScriptedModel>, tools: ToolRegistry) -> Self {
        Self {
            engine: ReasoningEngine::new(model, Arc::new(InMemoryStore::new())),
            tools,
            decisions: Mutex::new(Vec::new()),
            tool_calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl StepDriver for DirectDriver {
    fn agent_id(&self) -> &str {
        "a1"
    }

    fn execution_id(&self) -> &str {
        "e1"
    }

    async fn reason(
        &self,
        context: &str,
        prompt: &str,
        memory_kind: MemoryKind,
    ) -> Result<ReasoningStep> {
        let request = StepRequest::reason("a1", "e1", context, prompt).with_memory_kind(memory_kind);
        self.engine.execute(&request).await
    }

    async fn reflect(&self, prior: &ReasoningStep) -> Result<ReasoningStep> {
        self.engine.reflect("a1", "e1", prior).await
    }

    async fn explore(
        &self,
        context: &str,
        prompt: &str,
        branches: usize,
    ) -> Result<Vec<Result<ReasoningStep>>> {
        let snapshot = self.engine.recall("a1", prompt).await?;
        let mut outcomes = Vec::with_capacity(branches);
        for i in 0..branches {
            let request = StepRequest::reason("a1", "e1", context, prompt).with_branch(i);
            outcomes.push(self.engine.execute_with_memories(&request, &snapshot).await);
        }
        Ok(outcomes)
    }

    async fn execute_tool(&self, call: &ToolCall) -> Result<ToolResult> {
        self.tool_calls.lock().unwrap().push(call.clone());
        self.tools
            .execute_tool("a1", call)
            .await
            .map_err(Error::from)
    }

    fn tool_descriptions(&self) -> Vec<String> {
        self.tools.describe()
    }

    async fn record_decision(&self, payload: serde_json::Value) -> Result<()> {
        self.decisions.lock().unwrap().push(payload);
        Ok(())
    }
}

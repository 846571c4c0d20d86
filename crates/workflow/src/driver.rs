//! The per-execution [`StepDriver`].
//!
//! One driver exists per running execution and is the single owner of that
//! execution's event sequence. Every step goes through here:
//!
//! 1. Check for cancellation
//! 2. Commit `StepStarted`
//! 3. Run the engine under the retry policy, committing `StepFailed` for
//!    every failed attempt
//! 4. Commit `StepCompleted`, then append the step to the execution
//!
//! A pattern never proceeds before its step's events are in the store.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use mindloop_agent::engine::StepRequest;
use mindloop_agent::patterns::StepDriver;
use mindloop_config::PersistFailurePolicy;
use mindloop_core::error::{Error, Result};
use mindloop_core::event::{Event, EventBus, EventKind};
use mindloop_core::execution::{Execution, ReasoningStep};
use mindloop_core::memory::{MemoryContent, MemoryKind, MemoryRecord};
use mindloop_core::tool::{ToolCall, ToolResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::orchestrator::OrchestratorContext;

/// Shared between the orchestrator's registry and the execution's task.
pub(crate) struct ExecutionHandle {
    pub(crate) state: watch::Sender<Execution>,
    cancel: AtomicBool,
}

impl ExecutionHandle {
    pub(crate) fn new(execution: Execution) -> Self {
        let (state, _) = watch::channel(execution);
        Self {
            state,
            cancel: AtomicBool::new(false),
        }
    }

    pub(crate) fn snapshot(&self) -> Execution {
        self.state.borrow().clone()
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// A step record plus the event that announces it, not yet committed.
struct PendingRecord {
    step: ReasoningStep,
    kind: EventKind,
    payload: serde_json::Value,
}

pub(crate) struct ExecutionDriver {
    ctx: Arc<OrchestratorContext>,
    bus: Arc<EventBus>,
    handle: Arc<ExecutionHandle>,
    agent_id: String,
    execution_id: String,
    /// Last committed sequence. Held across the append.
    cursor: Mutex<u64>,
    next_step: AtomicUsize,
}

impl ExecutionDriver {
    pub(crate) fn new(
        ctx: Arc<OrchestratorContext>,
        bus: Arc<EventBus>,
        handle: Arc<ExecutionHandle>,
    ) -> Self {
        let (agent_id, execution_id) = {
            let execution = handle.state.borrow();
            (execution.agent_id.clone(), execution.execution_id.clone())
        };
        Self {
            ctx,
            bus,
            handle,
            agent_id,
            execution_id,
            cursor: Mutex::new(0),
            next_step: AtomicUsize::new(0),
        }
    }

    /// Commit one event, then publish it to live subscribers.
    ///
    /// Transient store failures are retried under the retry policy.
    pub(crate) async fn emit(&self, kind: EventKind, payload: serde_json::Value) -> Result<()> {
        let mut cursor = self.cursor.lock().await;
        let event = Event::new(&self.execution_id, *cursor + 1, kind, payload);

        let mut attempt = 1;
        loop {
            match self.ctx.events.append(&event).await {
                Ok(()) => break,
                Err(e) => {
                    let e = Error::from(e);
                    if !e.is_retryable() || !self.ctx.retry.allows_retry_after(attempt) {
                        return Err(e);
                    }
                    warn!(
                        execution_id = %self.execution_id,
                        sequence = event.sequence,
                        attempt,
                        error = %e,
                        "Event append failed, retrying"
                    );
                    tokio::time::sleep(self.ctx.retry.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }

        *cursor = event.sequence;
        drop(cursor);
        self.bus.publish(event);
        Ok(())
    }

    fn check_cancel(&self) -> Result<()> {
        if self.handle.is_cancelled() {
            debug!(execution_id = %self.execution_id, "Cancellation observed at step boundary");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Commit `StepStarted`. The first one moves the execution to `Running`.
    async fn start_step(&self, request: &StepRequest) -> Result<usize> {
        let step_index = self.next_step.fetch_add(1, Ordering::SeqCst);
        self.emit(
            EventKind::StepStarted,
            serde_json::json!({
                "step_index": step_index,
                "kind": request.kind,
                "branch": request.branch,
            }),
        )
        .await?;
        if step_index == 0 {
            self.handle.state.send_modify(|execution| {
                execution.mark_running();
            });
        }
        Ok(step_index)
    }

    /// Commit a record's event, then the record itself.
    async fn commit(&self, record: PendingRecord) -> Result<()> {
        self.emit(record.kind, record.payload).await?;
        self.handle
            .state
            .send_modify(|execution| execution.append_step(record.step));
        Ok(())
    }

    /// Run one step under the retry policy.
    ///
    /// With `deferred` set, records are collected there instead of being
    /// committed as they happen.
    async fn attempt_step(
        &self,
        step_index: usize,
        request: &StepRequest,
        snapshot: Option<&[MemoryRecord]>,
        mut deferred: Option<&mut Vec<PendingRecord>>,
    ) -> Result<ReasoningStep> {
        let mut attempt = 1;
        loop {
            let started_at = Utc::now();
            let outcome = match snapshot {
                Some(memories) => self.ctx.engine.execute_with_memories(request, memories).await,
                None => self.ctx.engine.execute(request).await,
            };

            let error = match outcome {
                Ok(mut step) => {
                    step.attempt = attempt;
                    self.recover_memory(&mut step, request).await;
                    let payload = serde_json::json!({
                        "step_index": step_index,
                        "step_id": step.step_id,
                        "kind": step.kind,
                        "branch": step.branch,
                        "attempt": attempt,
                        "output": step.output,
                        "memories_used": step.memories_used,
                        "memory_id": step.memory_id,
                        "memory_persist_failed": step.memory_persist_failed,
                    });
                    let record = PendingRecord {
                        step: step.clone(),
                        kind: EventKind::StepCompleted,
                        payload,
                    };
                    match deferred.as_deref_mut() {
                        Some(records) => records.push(record),
                        None => self.commit(record).await?,
                    }
                    return Ok(step);
                }
                Err(e) => e,
            };

            let retryable = error.is_retryable();
            let cancelled = self.handle.is_cancelled();
            let will_retry = retryable && !cancelled && self.ctx.retry.allows_retry_after(attempt);

            let mut failed = ReasoningStep::failed(
                &request.agent_id,
                &request.execution_id,
                request.kind,
                attempt,
                started_at,
                error.to_string(),
            );
            failed.branch = request.branch;
            let payload = serde_json::json!({
                "step_index": step_index,
                "step_id": failed.step_id,
                "kind": request.kind,
                "branch": request.branch,
                "attempt": attempt,
                "error": error.to_string(),
                "error_kind": error.kind(),
                "retryable": retryable,
                "will_retry": will_retry,
            });
            let pending = PendingRecord {
                step: failed,
                kind: EventKind::StepFailed,
                payload,
            };
            match deferred.as_deref_mut() {
                Some(records) => records.push(pending),
                None => self.commit(pending).await?,
            }

            if !will_retry {
                if retryable && cancelled {
                    return Err(Error::Cancelled);
                }
                return Err(error);
            }

            let delay = self.ctx.retry.delay_for(attempt);
            warn!(
                execution_id = %self.execution_id,
                step_index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Step failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Under `retry_store`, re-attempt a failed memory write. Generation is
    /// never repeated.
    async fn recover_memory(&self, step: &mut ReasoningStep, request: &StepRequest) {
        if !step.memory_persist_failed
            || self.ctx.persist_policy != PersistFailurePolicy::RetryStore
        {
            return;
        }

        let mut attempt = 1;
        while self.ctx.retry.allows_retry_after(attempt) {
            tokio::time::sleep(self.ctx.retry.delay_for(attempt)).await;
            attempt += 1;
            match self
                .ctx
                .engine
                .persist(step, request.memory_kind.clone(), &request.prompt)
                .await
            {
                Ok(record) => {
                    debug!(step_id = %step.step_id, attempt, "Memory write recovered");
                    step.memory_id = Some(record.id().to_string());
                    step.memory_persist_failed = false;
                    return;
                }
                Err(e) => {
                    warn!(step_id = %step.step_id, attempt, error = %e, "Memory write retry failed");
                }
            }
        }
    }

    async fn run_serial(&self, request: StepRequest) -> Result<ReasoningStep> {
        self.check_cancel()?;
        let step_index = self.start_step(&request).await?;
        let step = self.attempt_step(step_index, &request, None, None).await?;
        self.check_cancel()?;
        Ok(step)
    }

    async fn store_tool_result(&self, call: &ToolCall, result: &ToolResult) {
        let mut content = MemoryContent::new();
        content.insert("text".into(), result.output.clone().into());
        content.insert("tool".into(), call.name.clone().into());
        content.insert("arguments".into(), call.arguments.clone());
        content.insert("success".into(), result.success.into());
        content.insert("execution_id".into(), self.execution_id.clone().into());

        if let Err(e) = self
            .ctx
            .engine
            .memory()
            .store(&self.agent_id, MemoryKind::ToolResult, content)
            .await
        {
            warn!(tool = %call.name, error = %e, "Tool result not persisted to memory");
        }
    }
}

#[async_trait]
impl StepDriver for ExecutionDriver {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn execution_id(&self) -> &str {
        &self.execution_id
    }

    async fn reason(
        &self,
        context: &str,
        prompt: &str,
        memory_kind: MemoryKind,
    ) -> Result<ReasoningStep> {
        let request = StepRequest::reason(&self.agent_id, &self.execution_id, context, prompt)
            .with_memory_kind(memory_kind);
        self.run_serial(request).await
    }

    async fn reflect(&self, prior: &ReasoningStep) -> Result<ReasoningStep> {
        let request = self
            .ctx
            .engine
            .reflection_request(&self.agent_id, &self.execution_id, prior);
        self.run_serial(request).await
    }

    async fn explore(
        &self,
        context: &str,
        prompt: &str,
        branches: usize,
    ) -> Result<Vec<Result<ReasoningStep>>> {
        self.check_cancel()?;

        // One snapshot for every branch, read at dispatch.
        let mut attempt = 1;
        let snapshot = loop {
            match self.ctx.engine.recall(&self.agent_id, prompt).await {
                Ok(memories) => break memories,
                Err(e) if e.is_retryable() && self.ctx.retry.allows_retry_after(attempt) => {
                    warn!(execution_id = %self.execution_id, attempt, error = %e, "Recall failed, retrying");
                    tokio::time::sleep(self.ctx.retry.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let mut dispatched = Vec::with_capacity(branches);
        for branch in 0..branches {
            let request = StepRequest::reason(&self.agent_id, &self.execution_id, context, prompt)
                .with_branch(branch);
            let step_index = self.start_step(&request).await?;
            dispatched.push((step_index, request));
        }

        info!(
            execution_id = %self.execution_id,
            branches,
            memories = snapshot.len(),
            "Dispatching parallel branches"
        );

        let runs = dispatched.iter().map(|(step_index, request)| {
            let snapshot = snapshot.as_slice();
            async move {
                let mut records = Vec::new();
                let outcome = self
                    .attempt_step(*step_index, request, Some(snapshot), Some(&mut records))
                    .await;
                (records, outcome)
            }
        });
        let finished = join_all(runs).await;

        // Commit in branch order, whatever order the branches finished in.
        let mut outcomes = Vec::with_capacity(finished.len());
        for (records, outcome) in finished {
            for record in records {
                self.commit(record).await?;
            }
            outcomes.push(outcome);
        }

        self.check_cancel()?;
        Ok(outcomes)
    }

    async fn execute_tool(&self, call: &ToolCall) -> Result<ToolResult> {
        self.check_cancel()?;

        let outcome = self.ctx.tools.execute_tool(&self.agent_id, call).await;
        let (success, output) = match &outcome {
            Ok(result) => (result.success, result.output.clone()),
            Err(e) => (false, e.to_string()),
        };

        if let Ok(result) = &outcome {
            self.store_tool_result(call, result).await;
        }

        self.emit(
            EventKind::PatternDecision,
            serde_json::json!({
                "decision": "tool_invocation",
                "tool": call.name,
                "arguments": call.arguments,
                "success": success,
                "output": output,
            }),
        )
        .await?;

        Ok(outcome?)
    }

    fn tool_descriptions(&self) -> Vec<String> {
        self.ctx.tools.describe()
    }

    async fn record_decision(&self, payload: serde_json::Value) -> Result<()> {
        self.emit(EventKind::PatternDecision, payload).await
    }
}

//! The workflow orchestrator: owns every execution from `Execute` to its
//! terminal state.
//!
//! `execute` is non-blocking: it registers a `Pending` execution, spawns its
//! task and returns the id. The task drives the pattern through an
//! [`ExecutionDriver`], then closes the event trail with exactly one of
//! `ExecutionCompleted`, `ExecutionFailed` or `ExecutionCancelled`.
//!
//! Status reads never block on a running execution: each one is a clone of
//! the latest committed snapshot held in a `watch` channel. An execution
//! stays `Pending` until its first step starts.
//!
//! Finished executions stay queryable until evicted: at most
//! `retain_finished` of them are kept, oldest finished evicted first when a
//! new execution is scheduled. Their events stay in the event store.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use mindloop_agent::engine::ReasoningEngine;
use mindloop_agent::patterns::{PatternRegistry, WorkflowPattern};
use mindloop_config::{AppConfig, PersistFailurePolicy};
use mindloop_core::error::{Error, Result};
use mindloop_core::event::{Event, EventBus, EventKind, EventStore};
use mindloop_core::execution::{Execution, ExecutionResult, ExecutionStatus};
use mindloop_core::memory::MemoryStore;
use mindloop_core::model::{GenerationParams, ModelClient};
use mindloop_core::tool::ToolExecutor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::driver::{ExecutionDriver, ExecutionHandle};
use crate::retry::RetryPolicy;

/// Everything an orchestrator needs, constructed once per process.
pub struct OrchestratorContext {
    pub engine: Arc<ReasoningEngine>,
    pub events: Arc<dyn EventStore>,
    pub tools: Arc<dyn ToolExecutor>,
    pub patterns: PatternRegistry,
    pub retry: RetryPolicy,
    pub persist_policy: PersistFailurePolicy,
}

impl OrchestratorContext {
    /// Wire the engine, built-in patterns and built-in tools from config.
    pub fn from_config(
        config: &AppConfig,
        model: Arc<dyn ModelClient>,
        memory: Arc<dyn MemoryStore>,
        events: Arc<dyn EventStore>,
    ) -> Self {
        let params = GenerationParams {
            model: Some(config.model.model.clone()),
            temperature: config.model.temperature,
            max_tokens: Some(config.model.max_tokens),
            stop: Vec::new(),
        };
        let engine = ReasoningEngine::new(model, memory.clone())
            .with_params(params)
            .with_recall(config.engine.recall_limit, config.engine.recall_order)
            .with_preamble(config.engine.context_preamble.clone())
            .with_reflection_instruction(config.engine.reflection_instruction.clone());

        Self {
            engine: Arc::new(engine),
            events,
            tools: Arc::new(mindloop_tools::default_registry(memory)),
            patterns: PatternRegistry::builtin(&config.patterns),
            retry: RetryPolicy::from_config(&config.retry),
            persist_policy: config.retry.on_memory_persist_failure,
        }
    }
}

/// One line per execution, for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub agent_id: String,
    pub pattern_name: String,
    pub status: ExecutionStatus,
    pub step_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Execution> for ExecutionSummary {
    fn from(execution: &Execution) -> Self {
        Self {
            execution_id: execution.execution_id.clone(),
            agent_id: execution.agent_id.clone(),
            pattern_name: execution.pattern_name.clone(),
            status: execution.status,
            step_count: execution.steps.len(),
            created_at: execution.created_at,
        }
    }
}

/// Finished executions kept in the registry by default.
pub const DEFAULT_RETAIN_FINISHED: usize = 256;

pub struct Orchestrator {
    ctx: Arc<OrchestratorContext>,
    bus: Arc<EventBus>,
    executions: RwLock<HashMap<String, Arc<ExecutionHandle>>>,
    tasks: Mutex<JoinSet<()>>,
    retain_finished: usize,
}

impl Orchestrator {
    pub fn new(ctx: OrchestratorContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            bus: Arc::new(EventBus::default()),
            executions: RwLock::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
            retain_finished: DEFAULT_RETAIN_FINISHED,
        }
    }

    /// Keep at most `count` finished executions in memory.
    pub fn with_retention(mut self, count: usize) -> Self {
        self.retain_finished = count;
        self
    }

    /// Names callers may pass to [`Orchestrator::execute`].
    pub fn patterns(&self) -> Vec<&str> {
        self.ctx.patterns.names()
    }

    /// Start an execution and return its id without waiting for it.
    pub async fn execute(&self, agent_id: &str, pattern_name: &str, prompt: &str) -> Result<String> {
        let pattern = self.ctx.patterns.get(pattern_name)?;
        let execution = Execution::new(agent_id, pattern_name, prompt);
        let execution_id = execution.execution_id.clone();
        let handle = Arc::new(ExecutionHandle::new(execution));

        {
            let mut executions = self.executions.write().await;
            executions.insert(execution_id.clone(), handle.clone());
            evict_finished(&mut executions, self.retain_finished);
        }

        info!(
            execution_id = %execution_id,
            agent_id,
            pattern = pattern_name,
            "Execution scheduled"
        );

        let ctx = self.ctx.clone();
        let bus = self.bus.clone();
        let mut tasks = self.tasks.lock().await;
        // Reap finished tasks so the set only holds live ones.
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Execution task panicked");
            }
        }
        tasks.spawn(run_execution(ctx, bus, handle, pattern));

        Ok(execution_id)
    }

    /// The latest committed snapshot of an execution.
    pub async fn status(&self, execution_id: &str) -> Result<Execution> {
        Ok(self.handle(execution_id).await?.snapshot())
    }

    /// Request cooperative cancellation.
    ///
    /// Returns `false` if the execution already finished. Otherwise the
    /// execution becomes `Cancelled` at its next step boundary.
    pub async fn cancel(&self, execution_id: &str) -> Result<bool> {
        let handle = self.handle(execution_id).await?;
        if handle.state.borrow().status.is_terminal() {
            return Ok(false);
        }
        handle.request_cancel();
        info!(execution_id, "Cancellation requested");
        Ok(true)
    }

    /// Drop a finished execution from the registry.
    ///
    /// Returns `false`, and keeps the entry, while it is still live. Its
    /// events stay readable through [`Orchestrator::events`].
    pub async fn forget(&self, execution_id: &str) -> Result<bool> {
        let mut executions = self.executions.write().await;
        let handle = executions
            .get(execution_id)
            .ok_or_else(|| Error::ExecutionNotFound(execution_id.to_string()))?;
        if !handle.state.borrow().status.is_terminal() {
            return Ok(false);
        }
        executions.remove(execution_id);
        debug!(execution_id, "Execution forgotten");
        Ok(true)
    }

    /// The full, ordered event history of an execution.
    pub async fn events(&self, execution_id: &str) -> Result<Vec<Event>> {
        Ok(self.ctx.events.read_all(execution_id).await?)
    }

    /// Resolve once the execution reaches a terminal state.
    pub async fn wait(&self, execution_id: &str) -> Result<Execution> {
        let handle = self.handle(execution_id).await?;
        let mut rx = handle.state.subscribe();
        let finished = rx
            .wait_for(|execution| execution.status.is_terminal())
            .await
            .map_err(|e| Error::Internal(format!("execution state channel closed: {e}")))?
            .clone();
        Ok(finished)
    }

    /// Executions known to this orchestrator, oldest first.
    pub async fn list(&self, agent_id: Option<&str>) -> Vec<ExecutionSummary> {
        let executions = self.executions.read().await;
        let mut summaries: Vec<ExecutionSummary> = executions
            .values()
            .map(|handle| ExecutionSummary::from(&*handle.state.borrow()))
            .filter(|summary| agent_id.is_none_or(|id| summary.agent_id == id))
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// Live feed of committed events across all executions.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.bus.subscribe()
    }

    /// Cancel every live execution and wait for all tasks to finish.
    pub async fn shutdown(&self) {
        let live = {
            let executions = self.executions.read().await;
            let mut live = 0usize;
            for handle in executions.values() {
                if !handle.state.borrow().status.is_terminal() {
                    handle.request_cancel();
                    live += 1;
                }
            }
            live
        };
        info!(live, "Orchestrator shutting down");

        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Execution task panicked");
            }
        }
    }

    async fn handle(&self, execution_id: &str) -> Result<Arc<ExecutionHandle>> {
        self.executions
            .read()
            .await
            .get(execution_id)
            .cloned()
            .ok_or_else(|| Error::ExecutionNotFound(execution_id.to_string()))
    }
}

/// Evict the oldest finished executions beyond `keep`. Live ones are never
/// touched.
fn evict_finished(executions: &mut HashMap<String, Arc<ExecutionHandle>>, keep: usize) {
    let mut finished: Vec<(DateTime<Utc>, String)> = executions
        .iter()
        .filter_map(|(id, handle)| {
            let execution = handle.state.borrow();
            execution
                .status
                .is_terminal()
                .then(|| (execution.updated_at, id.clone()))
        })
        .collect();
    if finished.len() <= keep {
        return;
    }

    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        executions.remove(&id);
    }
    debug!(evicted = excess, keep, "Evicted finished executions");
}

/// Message carried by a panic payload, when it has one.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// The task body of one execution.
async fn run_execution(
    ctx: Arc<OrchestratorContext>,
    bus: Arc<EventBus>,
    handle: Arc<ExecutionHandle>,
    pattern: Arc<dyn WorkflowPattern>,
) {
    let snapshot = handle.snapshot();
    let execution_id = snapshot.execution_id.clone();
    let driver = ExecutionDriver::new(ctx.clone(), bus, handle.clone());

    let started = driver
        .emit(
            EventKind::ExecutionStarted,
            serde_json::json!({
                "agent_id": snapshot.agent_id,
                "pattern": snapshot.pattern_name,
                "prompt": snapshot.prompt,
            }),
        )
        .await;

    let outcome = match started {
        Ok(()) if handle.is_cancelled() => Err(Error::Cancelled),
        Ok(()) => AssertUnwindSafe(pattern.execute(&driver, &snapshot.prompt))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(Error::Internal(format!(
                    "pattern '{}' panicked: {}",
                    snapshot.pattern_name,
                    panic_message(payload.as_ref())
                )))
            }),
        Err(e) => Err(e),
    };
    // A cancel that lands during the final step still wins.
    let outcome = match outcome {
        Ok(_) if handle.is_cancelled() => Err(Error::Cancelled),
        other => other,
    };

    let last_completed_step = handle.state.borrow().last_completed_step();
    match outcome {
        Ok(result) => {
            let step_count = handle.state.borrow().steps.len();
            let closed = driver
                .emit(
                    EventKind::ExecutionCompleted,
                    serde_json::json!({
                        "output": result.final_output,
                        "step_count": step_count,
                    }),
                )
                .await;
            match closed {
                Ok(()) => {
                    info!(execution_id = %execution_id, step_count, "Execution completed");
                    handle.state.send_modify(|execution| {
                        execution.complete(ExecutionResult {
                            output: result.final_output,
                            details: result.details,
                        });
                    });
                }
                Err(e) => fail(&handle, &execution_id, &e),
            }
        }
        Err(Error::Cancelled) => {
            if let Err(e) = driver
                .emit(
                    EventKind::ExecutionCancelled,
                    serde_json::json!({ "last_completed_step": last_completed_step }),
                )
                .await
            {
                warn!(execution_id = %execution_id, error = %e, "Cancellation event not recorded");
            }
            info!(execution_id = %execution_id, "Execution cancelled");
            handle.state.send_modify(|execution| {
                execution.cancel();
            });
        }
        Err(e) => {
            if let Err(store_err) = driver
                .emit(
                    EventKind::ExecutionFailed,
                    serde_json::json!({
                        "error_kind": e.kind(),
                        "error": e.to_string(),
                        "last_completed_step": last_completed_step,
                    }),
                )
                .await
            {
                warn!(execution_id = %execution_id, error = %store_err, "Failure event not recorded");
            }
            fail(&handle, &execution_id, &e);
        }
    }

    if let Err(e) = ctx.events.flush(&execution_id).await {
        warn!(execution_id = %execution_id, error = %e, "Event flush failed");
    }
    debug!(execution_id = %execution_id, "Execution task finished");
}

fn fail(handle: &ExecutionHandle, execution_id: &str, e: &Error) {
    error!(execution_id, error_kind = ?e.kind(), error = %e, "Execution failed");
    handle.state.send_modify(|execution| {
        execution.fail(e.kind(), e.to_string());
    });
}

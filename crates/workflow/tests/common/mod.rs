//! Shared doubles for orchestrator integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use mindloop_agent::engine::ReasoningEngine;
use mindloop_agent::patterns::{PatternRegistry, WorkflowPattern};
use mindloop_config::{PatternsConfig, PersistFailurePolicy};
use mindloop_core::error::{EventStoreError, MemoryError, ModelError};
use mindloop_core::event::{Event, EventKind, EventStore};
use mindloop_core::memory::{MemoryContent, MemoryKind, MemoryQuery, MemoryRecord, MemoryStore};
use mindloop_core::model::{Generation, GenerationParams, ModelClient};
use mindloop_events::InMemoryEventStore;
use mindloop_memory::InMemoryStore;
use mindloop_workflow::{Orchestrator, OrchestratorContext, RetryPolicy};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

pub type Outcome = Result<Generation, ModelError>;

/// Replays a script of outcomes; the last one repeats.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Outcome>>,
    last: Mutex<Option<Outcome>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(script: Vec<Outcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(Generation::text(*t))).collect())
    }

    pub fn always(outcome: Outcome) -> Self {
        Self::new(vec![outcome])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
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

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Outcome {
        self.next()
    }
}

/// Blocks every generation until the test hands out a permit.
pub struct GatedModel {
    pub inner: ScriptedModel,
    pub entered: Notify,
    pub release: Semaphore,
}

impl GatedModel {
    pub fn texts(texts: &[&str]) -> Self {
        Self {
            inner: ScriptedModel::texts(texts),
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    pub fn open(&self) {
        self.release.add_permits(1000);
    }
}

#[async_trait]
impl ModelClient for GatedModel {
    fn name(&self) -> &str {
        "gated"
    }

    async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Outcome {
        self.entered.notify_one();
        self.release.acquire().await.unwrap().forget();
        self.inner.next()
    }
}

/// The first call waits until every other call has returned. Call `n`
/// answers `"answer n"`.
pub struct StragglerModel {
    others: usize,
    calls: AtomicUsize,
    finished: AtomicUsize,
    progress: Notify,
    prompts: Mutex<Vec<String>>,
    finish_order: Mutex<Vec<usize>>,
}

impl StragglerModel {
    pub fn new(calls: usize) -> Self {
        Self {
            others: calls.saturating_sub(1),
            calls: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            progress: Notify::new(),
            prompts: Mutex::new(Vec::new()),
            finish_order: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn finish_order(&self) -> Vec<usize> {
        self.finish_order.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for StragglerModel {
    fn name(&self) -> &str {
        "straggler"
    }

    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Outcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if call == 0 {
            loop {
                let progressed = self.progress.notified();
                if self.finished.load(Ordering::SeqCst) >= self.others {
                    break;
                }
                progressed.await;
            }
        }
        self.finish_order.lock().unwrap().push(call);
        self.finished.fetch_add(1, Ordering::SeqCst);
        self.progress.notify_waiters();
        Ok(Generation::text(format!("answer {call}")))
    }
}

/// Fails the first `failures` appends with `StorageUnavailable`.
pub struct FlakyEvents {
    pub inner: InMemoryEventStore,
    failures: AtomicUsize,
}

impl FlakyEvents {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryEventStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl EventStore for FlakyEvents {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn append(&self, event: &Event) -> Result<(), EventStoreError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(EventStoreError::StorageUnavailable("disk busy".into()));
        }
        self.inner.append(event).await
    }

    async fn read_all(&self, execution_id: &str) -> Result<Vec<Event>, EventStoreError> {
        self.inner.read_all(execution_id).await
    }
}

/// Fails the first `failures` writes with `StorageUnavailable`.
pub struct FlakyMemory {
    pub inner: InMemoryStore,
    failures: AtomicUsize,
}

impl FlakyMemory {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl MemoryStore for FlakyMemory {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn store(
        &self,
        agent_id: &str,
        kind: MemoryKind,
        content: MemoryContent,
    ) -> Result<MemoryRecord, MemoryError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(MemoryError::StorageUnavailable("disk full".into()));
        }
        self.inner.store(agent_id, kind, content).await
    }

    async fn retrieve(
        &self,
        agent_id: &str,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.inner.retrieve(agent_id, query).await
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        self.inner.get(id).await
    }

    async fn count(&self, agent_id: &str) -> Result<usize, MemoryError> {
        self.inner.count(agent_id).await
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(4), 2.0)
}

/// Builds an orchestrator over in-memory stores.
pub struct Harness {
    pub model: Arc<dyn ModelClient>,
    pub memory: Arc<dyn MemoryStore>,
    pub events: Arc<dyn EventStore>,
    pub patterns: PatternsConfig,
    pub retry: RetryPolicy,
    pub persist_policy: PersistFailurePolicy,
    pub extra_patterns: Vec<Arc<dyn WorkflowPattern>>,
}

impl Harness {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self {
            model,
            memory: Arc::new(InMemoryStore::new()),
            events: Arc::new(InMemoryEventStore::new()),
            patterns: PatternsConfig::default(),
            retry: fast_retry(3),
            persist_policy: PersistFailurePolicy::Proceed,
            extra_patterns: Vec::new(),
        }
    }

    pub fn build(&self) -> Orchestrator {
        let engine = ReasoningEngine::new(self.model.clone(), self.memory.clone());
        let mut patterns = PatternRegistry::builtin(&self.patterns);
        for pattern in &self.extra_patterns {
            patterns.register(pattern.clone());
        }
        Orchestrator::new(OrchestratorContext {
            engine: Arc::new(engine),
            events: self.events.clone(),
            tools: Arc::new(mindloop_tools::default_registry(self.memory.clone())),
            patterns,
            retry: self.retry.clone(),
            persist_policy: self.persist_policy,
        })
    }
}

pub fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

pub fn count(events: &[Event], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind == kind).count()
}

/// Sequences must run 1, 2, 3, ... with no gaps.
pub fn assert_contiguous(events: &[Event]) {
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.sequence, i as u64 + 1, "gap at event {i}");
    }
}

//! `mindloop run`: execute a pattern and print the outcome.

use mindloop_agent::patterns::PatternRegistry;
use mindloop_config::AppConfig;
use mindloop_core::event::{Event, EventKind};
use mindloop_core::execution::{Execution, ExecutionStatus};
use mindloop_workflow::{Orchestrator, OrchestratorContext};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info};

use super::storage;

pub async fn run(
    agent: &str,
    pattern: &str,
    prompt: &str,
    follow: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() && config.model.provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set MINDLOOP_API_KEY (or OPENAI_API_KEY), or add it to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let model = mindloop_providers::build_from_config(&config.model)?;
    let stores = storage::open(&config).await?;
    let orchestrator = Orchestrator::new(OrchestratorContext::from_config(
        &config,
        model,
        stores.memory,
        stores.events,
    ));

    // Subscribe before executing so no event is missed.
    let rx = follow.then(|| orchestrator.subscribe());
    let execution_id = orchestrator.execute(agent, pattern, prompt).await?;
    info!(execution_id = %execution_id, agent, pattern, "Execution started");
    println!("▶ {pattern} for agent '{agent}' (execution {execution_id})");

    let finished = async {
        let stream = async {
            if let Some(rx) = rx {
                stream_events(rx, &execution_id).await;
            }
        };
        tokio::join!(stream, orchestrator.wait(&execution_id)).1
    };

    let execution = tokio::select! {
        result = finished => result?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("⏹  Cancelling after the current step...");
            let requested = orchestrator.cancel(&execution_id).await?;
            info!(execution_id = %execution_id, requested, "Cancellation requested from terminal");
            orchestrator.wait(&execution_id).await?
        }
    };

    orchestrator.shutdown().await;
    debug!(execution_id = %execution_id, status = ?execution.status, "Orchestrator shut down");
    report(&execution)
}

pub fn patterns() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = PatternRegistry::builtin(&config.patterns);
    for name in registry.names() {
        println!("  {name}");
    }
    Ok(())
}

async fn stream_events(rx: broadcast::Receiver<Arc<Event>>, execution_id: &str) {
    let mut stream = BroadcastStream::new(rx);
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) if event.execution_id == execution_id => {
                println!("{}", describe(&event));
                if event.kind.is_terminal() {
                    return;
                }
            }
            Ok(_) => {}
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                eprintln!("  … {skipped} events skipped (see `mindloop events {execution_id}`)");
            }
        }
    }
}

fn report(execution: &Execution) -> Result<(), Box<dyn std::error::Error>> {
    println!();
    match execution.status {
        ExecutionStatus::Completed => {
            if let Some(result) = &execution.result {
                println!("{}", result.output);
            }
            println!();
            println!("✅ Completed in {} steps", execution.steps.len());
            Ok(())
        }
        ExecutionStatus::Cancelled => {
            println!("⏹  Cancelled after {} steps", execution.steps.len());
            Ok(())
        }
        _ => {
            let message = execution
                .error
                .as_ref()
                .map(|e| format!("{:?}: {}", e.kind, e.message))
                .unwrap_or_else(|| format!("{:?}", execution.status));
            Err(format!("Execution failed: {message}").into())
        }
    }
}

/// One line summarizing an event.
pub fn describe(event: &Event) -> String {
    let p = &event.payload;
    let detail = match event.kind {
        EventKind::ExecutionStarted => format!(
            "{} / {}",
            p["pattern"].as_str().unwrap_or("?"),
            p["agent_id"].as_str().unwrap_or("?")
        ),
        EventKind::StepStarted => step_label(p),
        EventKind::StepCompleted => format!(
            "{} → {}",
            step_label(p),
            preview(p["output"].as_str().unwrap_or(""))
        ),
        EventKind::StepFailed => format!(
            "{} attempt {}: {}{}",
            step_label(p),
            p["attempt"],
            p["error"].as_str().unwrap_or(""),
            if p["will_retry"] == true { " (retrying)" } else { "" }
        ),
        EventKind::PatternDecision => match p["decision"].as_str() {
            Some("tool_invocation") => format!(
                "tool {} → {}",
                p["tool"].as_str().unwrap_or("?"),
                preview(p["output"].as_str().unwrap_or(""))
            ),
            Some(other) => other.to_string(),
            None => p.to_string(),
        },
        EventKind::ExecutionCompleted => format!("{} steps", p["step_count"]),
        EventKind::ExecutionFailed => format!(
            "{}: {}",
            p["error_kind"].as_str().unwrap_or("?"),
            p["error"].as_str().unwrap_or("")
        ),
        EventKind::ExecutionCancelled => "cancelled".to_string(),
    };
    format!("  #{:<3} {:<20} {detail}", event.sequence, event.kind.as_str())
}

fn step_label(p: &serde_json::Value) -> String {
    let kind = p["kind"].as_str().unwrap_or("step");
    match p["branch"].as_u64() {
        Some(branch) => format!("[{}] {kind} (branch {branch})", p["step_index"]),
        None => format!("[{}] {kind}", p["step_index"]),
    }
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or("");
    let mut short: String = line.chars().take(72).collect();
    if short.len() < line.len() || text.lines().nth(1).is_some() {
        short.push('…');
    }
    short
}

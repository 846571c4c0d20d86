//! `mindloop events` / `mindloop executions`: replay the audit trail.

use mindloop_config::AppConfig;
use mindloop_core::event::{EventKind, EventStore};

use super::run::describe;
use super::storage;

pub async fn show(execution_id: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = storage::open_events(&config).await?;

    let events = store.read_all(execution_id).await?;
    if events.is_empty() {
        return Err(format!("No events recorded for execution {execution_id}").into());
    }

    for event in &events {
        if json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!("{}", describe(event));
        }
    }
    Ok(())
}

pub async fn list(limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = storage::open_events(&config).await?;

    let ids = store.execution_ids(limit).await?;
    if ids.is_empty() {
        println!("   No executions recorded yet.");
        return Ok(());
    }

    for id in ids {
        let events = store.read_all(&id).await?;
        let Some(first) = events.first() else {
            continue;
        };
        let state = events
            .last()
            .filter(|e| e.kind.is_terminal())
            .map_or("running", |e| match e.kind {
                EventKind::ExecutionCompleted => "completed",
                EventKind::ExecutionFailed => "failed",
                _ => "cancelled",
            });
        println!(
            "  {id}  {}  {:<24} {:<10} {:<10} {} events",
            first.timestamp.format("%Y-%m-%d %H:%M:%S"),
            first.payload["pattern"].as_str().unwrap_or("?"),
            first.payload["agent_id"].as_str().unwrap_or("?"),
            state,
            events.len()
        );
    }
    Ok(())
}

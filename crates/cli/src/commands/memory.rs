//! `mindloop memory`: inspect an agent's memories.

use mindloop_config::AppConfig;
use mindloop_core::memory::{MemoryKind, MemoryQuery, MemoryStore, RecallOrder};

use super::storage;

pub async fn show(
    agent_id: &str,
    kind: Option<&str>,
    query: Option<&str>,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = storage::open_memory(&config).await?;

    let kind = kind
        .map(|k| MemoryKind::parse(k).ok_or_else(|| format!("Unknown memory type: {k}")))
        .transpose()?;
    let memory_query = MemoryQuery {
        kind,
        limit,
        order: if query.is_some() {
            RecallOrder::Relevance
        } else {
            RecallOrder::MostRecentFirst
        },
        text: query.map(str::to_string),
    };

    let total = store.count(agent_id).await?;
    let records = store.retrieve(agent_id, &memory_query).await?;

    println!("🧠 Memories for '{agent_id}' ({total} total)");
    println!();
    if records.is_empty() {
        println!("   No memories found.");
        return Ok(());
    }
    for record in &records {
        let text = record.text();
        let first_line = text.lines().next().unwrap_or("");
        println!(
            "  {}  [{}] {}",
            record.created_at().format("%Y-%m-%d %H:%M:%S"),
            record.kind(),
            first_line.chars().take(80).collect::<String>()
        );
    }
    Ok(())
}

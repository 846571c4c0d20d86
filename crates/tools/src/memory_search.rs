//! Memory search tool: lets a planning agent look up its own memories.
//!
//! Results are always scoped to the calling agent and ranked by relevance
//! to the query text.

use async_trait::async_trait;
use mindloop_core::error::ToolError;
use mindloop_core::memory::{MemoryQuery, MemoryStore, RecallOrder};
use mindloop_core::tool::{Tool, ToolResult};
use std::sync::Arc;

pub struct MemorySearchTool {
    store: Arc<dyn MemoryStore>,
}

impl MemorySearchTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search your own stored memories for facts you learned earlier. \
         Input: the search text, or {\"query\": \"...\", \"limit\": 5}"
    }

    async fn execute(
        &self,
        agent_id: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let query = arguments
            .as_str()
            .or_else(|| arguments["query"].as_str())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let limit = arguments["limit"].as_u64().unwrap_or(5).clamp(1, 50) as usize;

        let records = self
            .store
            .retrieve(
                agent_id,
                &MemoryQuery {
                    order: RecallOrder::Relevance,
                    text: Some(query.to_string()),
                    ..MemoryQuery::recent(limit)
                },
            )
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "memory_search".into(),
                reason: e.to_string(),
            })?;

        if records.is_empty() {
            return Ok(ToolResult::ok(format!("No memories found matching '{query}'.")));
        }

        let lines: Vec<String> = records
            .iter()
            .map(|r| format!("- [{}] {}", r.kind(), r.text()))
            .collect();
        let ids: Vec<&str> = records.iter().map(|r| r.id()).collect();

        Ok(ToolResult::ok(lines.join("\n")).with_data(serde_json::json!({ "ids": ids })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindloop_core::memory::{MemoryContent, MemoryKind};
    use mindloop_memory::InMemoryStore;

    fn text(s: &str) -> MemoryContent {
        let mut content = MemoryContent::new();
        content.insert("text".into(), s.into());
        content
    }

    #[tokio::test]
    async fn finds_relevant_memories_for_agent_only() {
        let store = Arc::new(InMemoryStore::new());
        store
            .store("a1", MemoryKind::Observation, text("The deploy target is Fly.io"))
            .await
            .unwrap();
        store
            .store("a2", MemoryKind::Observation, text("The deploy target is AWS"))
            .await
            .unwrap();

        let tool = MemorySearchTool::new(store);
        let result = tool
            .execute("a1", serde_json::json!({"query": "deploy target", "limit": 3}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("Fly.io"));
        assert!(!result.output.contains("AWS"));
    }

    #[tokio::test]
    async fn empty_result_is_not_an_error() {
        let tool = MemorySearchTool::new(Arc::new(InMemoryStore::new()));
        let result = tool.execute("a1", serde_json::json!("anything")).await.unwrap();
        assert!(result.success);
        assert!(result.output.starts_with("No memories"));
    }

    #[tokio::test]
    async fn missing_query_is_invalid() {
        let tool = MemorySearchTool::new(Arc::new(InMemoryStore::new()));
        let err = tool.execute("a1", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}

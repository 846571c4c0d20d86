//! Built-in tools for Tool-Augmented Planning.

pub mod calculator;
pub mod memory_search;

use mindloop_core::memory::MemoryStore;
use mindloop_core::tool::ToolRegistry;
use std::sync::Arc;

pub use calculator::CalculatorTool;
pub use memory_search::MemorySearchTool;

/// Create a registry with every built-in tool.
pub fn default_registry(memory: Arc<dyn MemoryStore>) -> ToolRegistry {
    ToolRegistry::new()
        .with(Arc::new(CalculatorTool))
        .with(Arc::new(MemorySearchTool::new(memory)))
}

//! Tool system for agent tool calling. Retains the teacher's `Tool` trait
//! shape (`name`, `description`, `input_schema`, `execute`) and adds the
//! `pure` flag the tool loop uses to decide parallel-vs-serial execution
//! (spec.md §4.8 "Tool execution").

pub mod execute_command;
pub mod list_files;
pub mod read_file;
pub mod recall;
pub mod search_files;
pub mod write_file;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cortex_providers::ToolDefinition;

/// Context every tool executes with (spec.md §4.8: `{workspace, sessionId,
/// logger}` — `logger` is just `tracing`'s ambient subscriber here, so it
/// isn't threaded explicitly).
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workspace: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { content: message.into(), is_error: true }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;

    /// Tools with no side effects on one another (e.g. read_file,
    /// search_files) are `pure`; the loop may run several of them
    /// concurrently within one response. Mutating tools default to `false`
    /// so they execute serially in declared order.
    fn is_pure(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult;
}

pub fn to_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect()
}

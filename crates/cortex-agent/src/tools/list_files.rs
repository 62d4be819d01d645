//! Tool: list_files — list entries in a directory, one level deep.

use async_trait::async_trait;

use super::read_file::resolve;
use super::{Tool, ToolContext, ToolResult};

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories directly inside a directory."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list. Defaults to the workspace root." }
            }
        })
    }

    fn is_pure(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult {
        let path = input.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let resolved = resolve(&ctx.workspace, path);

        let entries = match std::fs::read_dir(&resolved) {
            Ok(e) => e,
            Err(e) => return ToolResult::error(format!("failed to list '{path}': {e}")),
        };

        let mut names: Vec<String> = Vec::new();
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            names.push(if is_dir { format!("{name}/") } else { name });
        }
        names.sort();

        if names.is_empty() {
            ToolResult::success("(empty directory)")
        } else {
            ToolResult::success(names.join("\n"))
        }
    }
}

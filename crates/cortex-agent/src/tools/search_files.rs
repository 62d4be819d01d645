//! Tool: search_files — recursively search file contents for a substring.

use async_trait::async_trait;

use super::read_file::resolve;
use super::{Tool, ToolContext, ToolResult};

const MAX_MATCHES: usize = 100;

pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Recursively search file contents for a substring pattern. Returns matching \
         lines in `file:line_number: content` format. Skips binary files and the .git \
         directory. Returns at most 100 matches."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Root directory to search in." },
                "pattern": { "type": "string", "description": "Substring to search for (case-sensitive)." },
                "file_pattern": { "type": "string", "description": "Optional filename suffix filter, e.g. '.rs'." }
            },
            "required": ["path", "pattern"]
        })
    }

    fn is_pure(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult {
        let Some(root) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: path");
        };
        let Some(pattern) = input.get("pattern").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: pattern");
        };
        let file_pattern = input.get("file_pattern").and_then(|v| v.as_str());
        let resolved = resolve(&ctx.workspace, root);

        let mut matches = Vec::new();
        let mut truncated = false;
        search_dir(&resolved, pattern, file_pattern, &mut matches, &mut truncated);

        if matches.is_empty() {
            return ToolResult::success("No matches found.");
        }

        let mut output = matches.join("\n");
        if truncated {
            output.push_str(&format!("\n\n[truncated at {MAX_MATCHES} matches]"));
        }
        ToolResult::success(output)
    }
}

fn search_dir(dir: &std::path::Path, pattern: &str, file_pattern: Option<&str>, matches: &mut Vec<String>, truncated: &mut bool) {
    let Ok(read_dir) = std::fs::read_dir(dir) else { return };
    let mut entries: Vec<std::path::PathBuf> = read_dir.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    entries.sort();

    for entry in entries {
        if *truncated {
            return;
        }
        if entry.file_name().map(|n| n == ".git").unwrap_or(false) {
            continue;
        }
        if entry.is_dir() {
            search_dir(&entry, pattern, file_pattern, matches, truncated);
        } else if entry.is_file() {
            if let Some(fp) = file_pattern {
                if !entry.to_string_lossy().ends_with(fp) {
                    continue;
                }
            }
            search_file(&entry, pattern, matches, truncated);
        }
    }
}

fn search_file(path: &std::path::Path, pattern: &str, matches: &mut Vec<String>, truncated: &mut bool) {
    let Ok(content) = std::fs::read(path) else { return };
    let probe = &content[..content.len().min(8192)];
    if probe.contains(&0u8) {
        return;
    }
    let Ok(text) = std::str::from_utf8(&content) else { return };
    let display_path = path.to_string_lossy();

    for (line_idx, line) in text.lines().enumerate() {
        if *truncated {
            return;
        }
        if line.contains(pattern) {
            matches.push(format!("{display_path}:{}: {line}", line_idx + 1));
            if matches.len() >= MAX_MATCHES {
                *truncated = true;
                return;
            }
        }
    }
}

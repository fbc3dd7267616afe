// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::tool::{Tool, ToolCall, ToolOutput};

const MAX_RESULTS: usize = 500;

/// Built-in filename search: substring match on the file name, results
/// sorted lexicographically.
pub struct FindTool;

#[async_trait]
impl Tool for FindTool {
    fn name(&self) -> &str {
        "find"
    }

    fn description(&self) -> &str {
        "Find files whose name contains 'name'.\n\
         'path' defaults to the working directory. Results are sorted paths,\n\
         capped at 500; hidden directories are skipped."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Substring of the file name" },
                "path": { "type": "string", "description": "Directory to search" }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(needle) = call.args.get("name").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'name' argument");
        };
        let needle = needle.to_string();
        let root = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();

        let id = call.id.clone();
        tokio::task::spawn_blocking(move || {
            let mut paths: Vec<String> = WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_hidden(e))
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .map(|n| n.contains(&needle))
                        .unwrap_or(false)
                })
                .map(|e| e.path().display().to_string())
                .collect();
            paths.sort();
            let total = paths.len();
            paths.truncate(MAX_RESULTS);
            let mut out = paths.join("\n");
            if total > MAX_RESULTS {
                out.push_str(&format!("\n[{} further results omitted]", total - MAX_RESULTS));
            }
            if out.is_empty() {
                ToolOutput::ok(&id, "no matches")
            } else {
                ToolOutput::ok(&id, out)
            }
        })
        .await
        .unwrap_or_else(|e| ToolOutput::err(&call.id, format!("find task failed: {e}")))
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|n| n.starts_with('.'))
            .unwrap_or(false)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

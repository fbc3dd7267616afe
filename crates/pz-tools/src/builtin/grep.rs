// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Upper bound on reported matches; grep over a vendored tree can hit
/// millions of lines.
const MAX_MATCHES: usize = 500;

/// Built-in regex search over a directory tree.
///
/// Output lines are `path:line_number:line` sorted lexicographically, so
/// identical trees always produce identical results.
pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a Rust regex.\n\
         'pattern' is required; 'path' defaults to the working directory.\n\
         Results are 'path:line:text', sorted, capped at 500 matches.\n\
         Hidden directories and non-UTF-8 files are skipped."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regex to search for" },
                "path": { "type": "string", "description": "Directory or file to search" }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(pattern) = call.args.get("pattern").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'pattern' argument");
        };
        let root = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();
        let regex = match regex::Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("invalid pattern: {e}")),
        };

        let id = call.id.clone();
        // Tree walks are blocking I/O; keep them off the async executor.
        tokio::task::spawn_blocking(move || {
            let mut hits: Vec<String> = Vec::new();
            for entry in WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_hidden(e))
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let Ok(content) = std::fs::read_to_string(entry.path()) else {
                    continue; // binary or unreadable
                };
                for (no, line) in content.lines().enumerate() {
                    if regex.is_match(line) {
                        hits.push(format!("{}:{}:{}", entry.path().display(), no + 1, line));
                    }
                }
            }
            hits.sort();
            let total = hits.len();
            hits.truncate(MAX_MATCHES);
            let mut out = hits.join("\n");
            if total > MAX_MATCHES {
                out.push_str(&format!("\n[{} further matches omitted]", total - MAX_MATCHES));
            }
            if out.is_empty() {
                ToolOutput::ok(&id, "no matches")
            } else {
                ToolOutput::ok(&id, out)
            }
        })
        .await
        .unwrap_or_else(|e| ToolOutput::err(&call.id, format!("grep task failed: {e}")))
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

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "grep".into(), args }
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "needle here\nplain\n").unwrap();
        std::fs::write(dir.path().join("a.txt"), "plain\nneedle again\n").unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), "needle hidden\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn matches_are_sorted_lexicographically() {
        let dir = tree();
        let out = GrepTool
            .execute(&call(json!({ "pattern": "needle", "path": dir.path().to_str().unwrap() })))
            .await;
        assert!(!out.is_error);
        let lines: Vec<&str> = out.content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("a.txt:2:needle again"), "{}", out.content);
        assert!(lines[1].contains("b.txt:1:needle here"));
    }

    #[tokio::test]
    async fn hidden_directories_are_skipped() {
        let dir = tree();
        let out = GrepTool
            .execute(&call(json!({ "pattern": "hidden", "path": dir.path().to_str().unwrap() })))
            .await;
        assert_eq!(out.content, "no matches");
    }

    #[tokio::test]
    async fn invalid_regex_is_an_error() {
        let out = GrepTool.execute(&call(json!({ "pattern": "(" }))).await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid pattern"));
    }

    #[tokio::test]
    async fn no_matches_is_a_successful_empty_result() {
        let dir = tree();
        let out = GrepTool
            .execute(&call(json!({ "pattern": "zzz", "path": dir.path().to_str().unwrap() })))
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "no matches");
    }
}

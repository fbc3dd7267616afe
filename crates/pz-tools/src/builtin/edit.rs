// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use similar::TextDiff;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Built-in tool that replaces one unique occurrence of `old` with `new`
/// and returns a unified diff of the change.
pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace text in a file.\n\
         'old' must match exactly one location in the file; widen it with\n\
         surrounding context if it is ambiguous. Returns a unified diff."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to edit" },
                "old": { "type": "string", "description": "Exact text to replace" },
                "new": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old", "new"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let (path, old, new) = match (
            call.args.get("path").and_then(|v| v.as_str()),
            call.args.get("old").and_then(|v| v.as_str()),
            call.args.get("new").and_then(|v| v.as_str()),
        ) {
            (Some(p), Some(o), Some(n)) => (p, o, n),
            _ => return ToolOutput::err(&call.id, "requires 'path', 'old' and 'new' arguments"),
        };
        if old.is_empty() {
            return ToolOutput::err(&call.id, "'old' must not be empty");
        }

        let before = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("read {path}: {e}")),
        };

        let matches = before.matches(old).count();
        if matches == 0 {
            return ToolOutput::err(&call.id, format!("old text not found in {path}"));
        }
        if matches > 1 {
            return ToolOutput::err(
                &call.id,
                format!("old text matches {matches} locations in {path}; add surrounding context"),
            );
        }

        let after = before.replacen(old, new, 1);
        if let Err(e) = tokio::fs::write(path, &after).await {
            return ToolOutput::err(&call.id, format!("write {path}: {e}"));
        }

        let diff = TextDiff::from_lines(&before, &after)
            .unified_diff()
            .context_radius(3)
            .header(path, path)
            .to_string();
        ToolOutput::ok(&call.id, diff)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "edit".into(), args }
    }

    fn setup(content: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.rs");
        std::fs::write(&path, content).unwrap();
        (dir, path.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn unique_match_is_replaced_and_diffed() {
        let (_dir, path) = setup("fn a() {}\nfn b() {}\n");
        let out = EditTool
            .execute(&call(json!({ "path": path, "old": "fn b() {}", "new": "fn c() {}" })))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("-fn b() {}"));
        assert!(out.content.contains("+fn c() {}"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fn a() {}\nfn c() {}\n");
    }

    #[tokio::test]
    async fn missing_match_is_an_error() {
        let (_dir, path) = setup("hello\n");
        let out = EditTool
            .execute(&call(json!({ "path": path, "old": "absent", "new": "x" })))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("not found"));
    }

    #[tokio::test]
    async fn ambiguous_match_is_rejected_with_count() {
        let (_dir, path) = setup("dup\ndup\n");
        let out = EditTool
            .execute(&call(json!({ "path": path, "old": "dup", "new": "x" })))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("2 locations"));
        // File untouched on failure.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "dup\ndup\n");
    }

    #[tokio::test]
    async fn empty_old_is_rejected() {
        let (_dir, path) = setup("x");
        let out = EditTool
            .execute(&call(json!({ "path": path, "old": "", "new": "y" })))
            .await;
        assert!(out.is_error);
    }
}

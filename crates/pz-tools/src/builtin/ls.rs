// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Built-in directory listing: names sorted lexicographically, directories
/// marked with a trailing `/`.
pub struct LsTool;

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List a directory. 'path' defaults to the working directory.\n\
         Entries are sorted; directories carry a trailing '/'."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list" }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".");
        let mut read_dir = match tokio::fs::read_dir(path).await {
            Ok(rd) => rd,
            Err(e) => return ToolOutput::err(&call.id, format!("ls {path}: {e}")),
        };
        let mut names = Vec::new();
        loop {
            match read_dir.next_entry().await {
                Ok(Some(entry)) => {
                    let mut name = entry.file_name().to_string_lossy().to_string();
                    if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                        name.push('/');
                    }
                    names.push(name);
                }
                Ok(None) => break,
                Err(e) => return ToolOutput::err(&call.id, format!("ls {path}: {e}")),
            }
        }
        names.sort();
        if names.is_empty() {
            ToolOutput::ok(&call.id, "(empty)")
        } else {
            ToolOutput::ok(&call.id, names.join("\n"))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "ls".into(), args }
    }

    #[tokio::test]
    async fn entries_are_sorted_with_dir_markers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zz.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("aa")).unwrap();
        std::fs::write(dir.path().join("mm.rs"), "").unwrap();
        let out = LsTool
            .execute(&call(json!({ "path": dir.path().to_str().unwrap() })))
            .await;
        assert_eq!(out.content, "aa/\nmm.rs\nzz.txt");
    }

    #[tokio::test]
    async fn empty_directory_reports_empty() {
        let dir = tempfile::tempdir().unwrap();
        let out = LsTool
            .execute(&call(json!({ "path": dir.path().to_str().unwrap() })))
            .await;
        assert_eq!(out.content, "(empty)");
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let out = LsTool.execute(&call(json!({ "path": "/no/such/dir" }))).await;
        assert!(out.is_error);
    }
}

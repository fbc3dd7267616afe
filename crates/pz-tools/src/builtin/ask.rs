// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Interactively ask the user one or more questions.
///
/// Only available when the mode sink is interactive; print/JSON pipelines
/// get an explicit "unsupported" error rather than a silent success, so the
/// model learns the tool is off the table.
pub struct AskTool {
    interactive: bool,
}

impl AskTool {
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }
}

#[async_trait]
impl Tool for AskTool {
    fn name(&self) -> &str {
        "ask"
    }

    fn description(&self) -> &str {
        "Ask the user one or more free-form questions and collect answers.\n\
         Returns {\"cancelled\": bool, \"answers\": [..]} as JSON.\n\
         Unavailable in headless/piped modes — returns an error there.\n\
         Use only for decisions you cannot make from the available context."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "questions": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Questions to put to the user, in order",
                    "minItems": 1
                }
            },
            "required": ["questions"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let questions: Vec<String> = call
            .args
            .get("questions")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|q| q.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if questions.is_empty() {
            return ToolOutput::err(&call.id, "missing 'questions' argument");
        }
        if !self.interactive {
            return ToolOutput::err(
                &call.id,
                "ask is unsupported in non-interactive mode; decide from available context",
            );
        }

        // Terminal prompt on stderr so stdout stays clean for the pipeline.
        let result = tokio::task::spawn_blocking(move || prompt_on_terminal(&questions)).await;
        match result {
            Ok(reply) => ToolOutput::ok(&call.id, reply.to_string()),
            Err(e) => ToolOutput::err(&call.id, format!("ask task failed: {e}")),
        }
    }
}

fn prompt_on_terminal(questions: &[String]) -> Value {
    use std::io::{BufRead, Write};

    let stdin = std::io::stdin();
    let mut answers = Vec::new();
    for q in questions {
        eprint!("{q}\n> ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => {
                // EOF mid-dialog: report what we have as cancelled.
                return json!({ "cancelled": true, "answers": answers });
            }
            Ok(_) => answers.push(line.trim_end_matches('\n').to_string()),
        }
    }
    json!({ "cancelled": false, "answers": answers })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

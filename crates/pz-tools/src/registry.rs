// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::mask::{is_enabled, BUILTIN_ORDER};
use crate::tool::{Tool, ToolCall, ToolOutput};
use crate::truncate::truncate_output;

/// Schema summary handed to providers.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Lifecycle notifications emitted around each dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolLifecycle {
    Start { id: String, name: String },
    Finish { id: String, name: String, output: String, is_err: bool },
}

/// Central registry holding all available tools in canonical order.
pub struct ToolRegistry {
    order: Vec<String>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { order: Vec::new(), tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered names in canonical registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Schemas for the tools enabled by `mask`, in canonical order.
    pub fn schemas(&self, mask: u32) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter(|name| is_enabled(mask, name))
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.schema(),
            })
            .collect()
    }

    /// Dispatch one call through the full pipeline: mask gate, argument
    /// validation, lifecycle events, execution, output truncation.
    ///
    /// Every failure mode is a `ToolOutput` with `is_error` — tool problems
    /// never abort the agent loop.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        mask: u32,
        on_event: &mut dyn FnMut(ToolLifecycle),
    ) -> ToolOutput {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
        };
        if !is_enabled(mask, &call.name) {
            return ToolOutput::err(&call.id, "tool disabled");
        }
        if let Err(hint) = validate_args(&tool.schema(), &call.args) {
            return ToolOutput::err(&call.id, hint);
        }

        on_event(ToolLifecycle::Start { id: call.id.clone(), name: call.name.clone() });
        debug!(tool = %call.name, id = %call.id, "dispatching tool");

        let mut output = tool.execute(call).await;
        output.content = truncate_output(&output.content, tool.output_cap());

        on_event(ToolLifecycle::Finish {
            id: call.id.clone(),
            name: call.name.clone(),
            output: output.content.clone(),
            is_err: output.is_error,
        });
        output
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shallow JSON-schema check: the argument object must be an object, carry
/// every required field, and use only declared fields. The error message
/// names the accepted fields so the model can self-correct.
fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let accepted: Vec<&str> = schema["properties"]
        .as_object()
        .map(|p| p.keys().map(String::as_str).collect())
        .unwrap_or_default();
    let hint = format!("accepted fields: {}", accepted.join(", "));

    let Some(obj) = args.as_object() else {
        return Err(format!("arguments must be a JSON object; {hint}"));
    };
    if let Some(required) = schema["required"].as_array() {
        for field in required.iter().filter_map(|v| v.as_str()) {
            if !obj.contains_key(field) {
                return Err(format!("missing required field {field:?}; {hint}"));
            }
        }
    }
    for key in obj.keys() {
        if !accepted.contains(&key.as_str()) {
            return Err(format!("unknown field {key:?}; {hint}"));
        }
    }
    Ok(())
}

/// Build the registry with every builtin in canonical order.
pub fn builtin_registry(interactive_ask: bool) -> ToolRegistry {
    use crate::builtin;

    let mut reg = ToolRegistry::new();
    reg.register(builtin::read::ReadTool);
    reg.register(builtin::write::WriteTool);
    reg.register(builtin::bash::BashTool::default());
    reg.register(builtin::edit::EditTool);
    reg.register(builtin::grep::GrepTool);
    reg.register(builtin::find::FindTool);
    reg.register(builtin::ls::LsTool);
    reg.register(builtin::ask::AskTool::new(interactive_ask));
    debug_assert_eq!(reg.names(), BUILTIN_ORDER.to_vec());
    reg
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

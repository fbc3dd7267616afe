// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single content part in a message.
///
/// Invariant: a `Tool`-role message carries only `ToolResult` parts, and an
/// assistant message carrying a `ToolCall` is eventually followed by a tool
/// message with a matching id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    ToolCall {
        id: String,
        name: String,
        /// JSON-encoded argument object
        args: String,
    },
    ToolResult {
        id: String,
        out: String,
        is_err: bool,
    },
}

/// A single message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Msg {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Msg {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, parts: vec![Part::Text { text: text.into() }] }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, parts: vec![Part::Text { text: text.into() }] }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, parts: vec![Part::Text { text: text.into() }] }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        args: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            parts: vec![Part::ToolCall { id: id.into(), name: name.into(), args: args.into() }],
        }
    }

    pub fn tool_result(id: impl Into<String>, out: impl Into<String>, is_err: bool) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![Part::ToolResult { id: id.into(), out: out.into(), is_err }],
        }
    }

    /// Return the plain text of this message, if it has exactly one text part.
    pub fn as_text(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [Part::Text { text }] => Some(text),
            _ => None,
        }
    }
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub schema: serde_json::Value,
}

// ─── Request options ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Thinking {
    #[default]
    Off,
    Adaptive,
    Budget,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Opts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_out: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default)]
    pub thinking: Thinking,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Req {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub msgs: Vec<Msg>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
    #[serde(default)]
    pub opts: Opts,
}

impl Default for Msg {
    fn default() -> Self {
        Self { role: Role::User, parts: Vec::new() }
    }
}

// ─── Streamed events ──────────────────────────────────────────────────────────

/// Token usage from one turn, including provider prompt-cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub in_tok: u64,
    pub out_tok: u64,
    pub tot_tok: u64,
    /// Tokens served from the provider's prompt cache (read hit).
    pub cache_read: u64,
    /// Tokens written into the provider's prompt cache (write/creation).
    pub cache_write: u64,
}

/// Why a stream stopped.
///
/// The variants carry a total order used when merging multiple stop
/// observations: `done < tool < max_out < canceled < err`, higher rank wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Done,
    MaxOut,
    Tool,
    Canceled,
    Err,
}

impl StopReason {
    pub fn rank(self) -> u8 {
        match self {
            Self::Done => 0,
            Self::Tool => 1,
            Self::MaxOut => 2,
            Self::Canceled => 3,
            Self::Err => 4,
        }
    }

    /// Merge two stop observations; the higher-ranked reason wins.
    pub fn merge(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::MaxOut => "max_out",
            Self::Tool => "tool",
            Self::Canceled => "canceled",
            Self::Err => "err",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "done" => Some(Self::Done),
            "max_out" => Some(Self::MaxOut),
            "tool" => Some(Self::Tool),
            "canceled" => Some(Self::Canceled),
            "err" => Some(Self::Err),
            _ => None,
        }
    }
}

/// A single streamed event from the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Ev {
    /// A text delta streamed from the model
    Text(String),
    /// A thinking/reasoning delta (extended thinking API)
    Thinking(String),
    /// The model wants to call a tool; arguments are fully accumulated
    ToolCall { id: String, name: String, args: String },
    /// The result of executing a tool
    ToolResult { id: String, out: String, is_err: bool },
    /// Token usage statistics
    Usage(Usage),
    /// The stream finished
    Stop(StopReason),
    /// A diagnostic error surfaced in-stream (followed by `Stop(Err)`)
    Err(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Versioned session record schema.
//!
//! One record per line, LF-terminated UTF-8 JSON:
//! `{"version":1,"at_ms":<i64>,"data":<variant>}`. The variant set and field
//! names are part of the on-disk contract — replay of an old session must
//! decode bit-exactly.

use pz_model::{Ev, StopReason};
use serde::{Deserialize, Serialize};

pub const SESSION_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventData {
    Noop {},
    Prompt { text: String },
    Text { text: String },
    Thinking { text: String },
    ToolCall { id: String, name: String, args: String },
    ToolResult { id: String, out: String, is_err: bool },
    Usage {
        in_tok: u64,
        out_tok: u64,
        tot_tok: u64,
        cache_read: u64,
        cache_write: u64,
    },
    Stop { reason: StopReason },
    Err { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub version: u32,
    pub at_ms: i64,
    pub data: EventData,
}

impl SessionEvent {
    pub fn new(at_ms: i64, data: EventData) -> Self {
        Self { version: SESSION_VERSION, at_ms, data }
    }

    /// Record stamped with the current wall clock.
    pub fn now(data: EventData) -> Self {
        Self::new(now_ms(), data)
    }

    pub fn prompt(text: impl Into<String>) -> Self {
        Self::now(EventData::Prompt { text: text.into() })
    }

    /// Encode as a single JSON line (no trailing newline).
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("session events always serialize")
    }

    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Map a loop event onto its persisted form.
impl From<&Ev> for EventData {
    fn from(ev: &Ev) -> Self {
        match ev {
            Ev::Text(t) => EventData::Text { text: t.clone() },
            Ev::Thinking(t) => EventData::Thinking { text: t.clone() },
            Ev::ToolCall { id, name, args } => EventData::ToolCall {
                id: id.clone(),
                name: name.clone(),
                args: args.clone(),
            },
            Ev::ToolResult { id, out, is_err } => EventData::ToolResult {
                id: id.clone(),
                out: out.clone(),
                is_err: *is_err,
            },
            Ev::Usage(u) => EventData::Usage {
                in_tok: u.in_tok,
                out_tok: u.out_tok,
                tot_tok: u.tot_tok,
                cache_read: u.cache_read,
                cache_write: u.cache_write,
            },
            Ev::Stop(r) => EventData::Stop { reason: *r },
            Ev::Err(t) => EventData::Err { text: t.clone() },
        }
    }
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

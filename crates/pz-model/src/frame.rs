// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Canonical line-framed event protocol.
//!
//! This is the wire format spoken by subprocess providers and parsed by the
//! generic streaming runner: newline-terminated `tag:value` records, one
//! event per line. Lines can be split across transport chunks at any byte
//! boundary, so the parser carries a remainder buffer forward and only
//! decodes complete lines.

use crate::error::WireError;
use crate::types::{Ev, StopReason, Usage};

/// Incremental decoder for the `tag:value` protocol.
///
/// `feed` accumulates bytes and emits an event for every complete line;
/// `finish` drains a trailing unterminated line and enforces that exactly
/// one `stop` was seen. All event strings are owned copies — the parser
/// holds no references into caller buffers across calls.
///
/// Property: for any partitioning of the same byte stream into chunks, the
/// emitted event sequence is identical.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
    saw_stop: bool,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns the events completed by this chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Ev>, WireError> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).take(pos).collect();
            if let Some(ev) = self.decode_line(&line)? {
                events.push(ev);
            }
        }
        Ok(events)
    }

    /// Drain a pending non-empty line, then require that a `stop` was seen.
    pub fn finish(&mut self) -> Result<Vec<Ev>, WireError> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            if let Some(ev) = self.decode_line(&line)? {
                events.push(ev);
            }
        }
        if !self.saw_stop {
            return Err(WireError::MissingStop);
        }
        Ok(events)
    }

    fn decode_line(&mut self, raw: &[u8]) -> Result<Option<Ev>, WireError> {
        let mut line = raw;
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        if line.is_empty() {
            return Ok(None);
        }
        // Everything after the single stop line is ignored.
        if self.saw_stop {
            return Ok(None);
        }
        let text = std::str::from_utf8(line)
            .map_err(|_| WireError::BadFrame("non-UTF-8 line".into()))?;
        let (tag, value) = text
            .split_once(':')
            .ok_or_else(|| WireError::BadFrame(text.to_string()))?;
        let ev = match tag {
            "text" => Ev::Text(value.to_string()),
            "thinking" => Ev::Thinking(value.to_string()),
            "err" => Ev::Err(value.to_string()),
            "tool_call" => {
                let (id, rest) = value
                    .split_once('|')
                    .ok_or_else(|| WireError::BadFrame(text.to_string()))?;
                let (name, args) = rest
                    .split_once('|')
                    .ok_or_else(|| WireError::BadFrame(text.to_string()))?;
                Ev::ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    args: args.to_string(),
                }
            }
            "tool_result" => {
                let (id, rest) = value
                    .split_once('|')
                    .ok_or_else(|| WireError::BadFrame(text.to_string()))?;
                let (flag, out) = rest
                    .split_once('|')
                    .ok_or_else(|| WireError::BadFrame(text.to_string()))?;
                let is_err = match flag {
                    "0" => false,
                    "1" => true,
                    _ => return Err(WireError::BadFrame(text.to_string())),
                };
                Ev::ToolResult { id: id.to_string(), out: out.to_string(), is_err }
            }
            "usage" => {
                let mut nums = value.split(',');
                let mut next = || -> Result<u64, WireError> {
                    nums.next()
                        .ok_or_else(|| WireError::InvalidUsage(value.to_string()))?
                        .parse::<u64>()
                        .map_err(|_| WireError::InvalidUsage(value.to_string()))
                };
                let in_tok = next()?;
                let out_tok = next()?;
                let tot_tok = next()?;
                if nums.next().is_some() {
                    return Err(WireError::InvalidUsage(value.to_string()));
                }
                Ev::Usage(Usage { in_tok, out_tok, tot_tok, cache_read: 0, cache_write: 0 })
            }
            "stop" => {
                let reason = StopReason::parse(value)
                    .ok_or_else(|| WireError::UnknownStop(value.to_string()))?;
                self.saw_stop = true;
                Ev::Stop(reason)
            }
            other => return Err(WireError::UnknownTag(other.to_string())),
        };
        Ok(Some(ev))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

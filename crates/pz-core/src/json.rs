// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! JSON event-stream sink: one JSON object per line, in arrival order.
//!
//! The line payloads reuse the session-event variant encoding so a consumer
//! can treat the stream and a replayed session interchangeably.

use std::io::Write;

use pz_model::Ev;
use pz_session::EventData;
use serde_json::json;

use crate::sink::ModeSink;

pub struct JsonSink<W: Write> {
    out: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, value: serde_json::Value) {
        let _ = serde_json::to_writer(&mut self.out, &value);
        let _ = self.out.write_all(b"\n");
        let _ = self.out.flush();
    }
}

impl<W: Write> ModeSink for JsonSink<W> {
    fn push(&mut self, ev: &Ev) {
        let data = EventData::from(ev);
        let value = serde_json::to_value(&data).unwrap_or_else(|_| json!({}));
        self.write_line(value);
    }

    fn tool_start(&mut self, id: &str, name: &str) {
        self.write_line(json!({ "tool_start": { "id": id, "name": name } }));
    }

    fn tool_finish(&mut self, id: &str, name: &str, is_err: bool) {
        self.write_line(json!({ "tool_finish": { "id": id, "name": name, "is_err": is_err } }));
    }

    fn finish(&mut self) {
        let _ = self.out.flush();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use serde_json::json;
use tracing::{debug, warn};

use pz_model::{ErrClass, Ev, Msg, Opts, Provider, Req, StopReason, ToolDef};
use pz_session::{
    compact_session, load_retry, save_retry, EventData, RetryState, SessionEvent, SessionWriter,
};
use pz_tools::{ToolCall, ToolLifecycle, ToolRegistry};

use crate::cancel::CancelToken;
use crate::sink::ModeSink;

/// Per-prompt loop parameters resolved from the CLI.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub model: String,
    pub opts: Opts,
    pub tool_mask: u32,
    pub max_turns: Option<u32>,
    /// Session line count that triggers compaction after a turn.
    pub compact_threshold_lines: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            opts: Opts::default(),
            tool_mask: pz_tools::ALL_TOOLS,
            max_turns: None,
            compact_threshold_lines: 4096,
        }
    }
}

/// The core agent: drives the provider ↔ tool loop for one prompt at a
/// time, mirroring every event into the mode sink and the session log.
///
/// Ordering contract: the sink sees each event before it is appended to the
/// session, so replay order always matches on-screen order; tool dispatch
/// is call-buffer FIFO; cancellation yields exactly one trailing
/// `stop(canceled)` in both sink and session.
pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    writer: SessionWriter,
    session_dir: PathBuf,
    cfg: LoopConfig,
    cancel: CancelToken,
    history: Vec<Msg>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        writer: SessionWriter,
        session_dir: PathBuf,
        cfg: LoopConfig,
        cancel: CancelToken,
    ) -> Self {
        Self { provider, tools, writer, session_dir, cfg, cancel, history: Vec::new() }
    }

    /// Pre-load conversation history (session resume) without submitting.
    pub fn seed_history(&mut self, msgs: Vec<Msg>) {
        self.history = msgs;
    }

    pub fn history(&self) -> &[Msg] {
        &self.history
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the turn loop for one prompt until a non-tool stop.
    pub async fn run_prompt(
        &mut self,
        prompt: &str,
        sink: &mut dyn ModeSink,
    ) -> anyhow::Result<StopReason> {
        self.writer
            .append(&SessionEvent::prompt(prompt))
            .context("appending prompt to session")?;
        self.history.push(Msg::user(prompt));

        let mut turns = 0u32;
        loop {
            if self.cancel.is_canceled() {
                return self.finish_canceled(sink);
            }
            if let Some(max) = self.cfg.max_turns {
                if turns >= max {
                    self.emit(sink, Ev::Err(format!("max turns ({max}) reached")))?;
                    self.emit(sink, Ev::Stop(StopReason::Err))?;
                    return Ok(StopReason::Err);
                }
            }
            turns += 1;
            debug!(turn = turns, "starting turn");

            let req = self.build_request();
            let mut stream = match self.provider.start(req).await {
                Ok(s) => s,
                Err(e) => {
                    self.record_try(Some(ErrClass::Fatal));
                    self.emit(sink, Ev::Err(format!("provider start failed: {e:#}")))?;
                    self.emit(sink, Ev::Stop(StopReason::Err))?;
                    return Ok(StopReason::Err);
                }
            };

            let mut text_buf = String::new();
            let mut calls: Vec<(String, String, String)> = Vec::new();
            let mut stop: Option<StopReason> = None;

            while let Some(item) = stream.next().await {
                // Event boundaries are the cancellation checkpoints inside a
                // turn; dropping the stream tears the transport down.
                if self.cancel.is_canceled() {
                    drop(stream);
                    return self.finish_canceled(sink);
                }
                let ev = match item {
                    Ok(ev) => ev,
                    Err(e) => {
                        self.record_try(Some(ErrClass::Transient));
                        self.emit(sink, Ev::Err(format!("stream failed: {e:#}")))?;
                        self.emit(sink, Ev::Stop(StopReason::Err))?;
                        return Ok(StopReason::Err);
                    }
                };
                match &ev {
                    Ev::Text(t) => text_buf.push_str(t),
                    Ev::ToolCall { id, name, args } => {
                        calls.push((id.clone(), name.clone(), args.clone()))
                    }
                    Ev::Stop(r) => stop = Some(*r),
                    _ => {}
                }
                self.emit(sink, ev)?;
                if stop.is_some() {
                    break;
                }
            }

            // Commit the assistant turn to history: text first, then the
            // tool-call messages their results will answer.
            if !text_buf.is_empty() {
                self.history.push(Msg::assistant(&text_buf));
            }
            for (id, name, args) in &calls {
                self.history.push(Msg::tool_call(id, name, args));
            }

            let Some(stop) = stop else {
                warn!("provider stream ended without a stop event");
                self.record_try(Some(ErrClass::Parse));
                self.emit(sink, Ev::Err("stream ended without a stop".into()))?;
                self.emit(sink, Ev::Stop(StopReason::Err))?;
                return Ok(StopReason::Err);
            };
            self.record_try(None);

            if stop == StopReason::Tool {
                self.dispatch_tools(calls, sink).await?;
                self.maybe_compact()?;
                continue;
            }

            self.maybe_compact()?;
            return Ok(stop);
        }
    }

    /// Execute buffered tool calls in FIFO order, appending each result to
    /// history and session. Cancellation is honored between dispatches.
    async fn dispatch_tools(
        &mut self,
        calls: Vec<(String, String, String)>,
        sink: &mut dyn ModeSink,
    ) -> anyhow::Result<()> {
        for (id, name, args) in calls {
            if self.cancel.is_canceled() {
                return Ok(()); // the turn loop emits the canceled stop
            }
            let parsed = serde_json::from_str(&args).unwrap_or_else(|_| {
                warn!(tool = %name, "tool call arguments are not valid JSON; passing {{}}");
                json!({})
            });
            let call = ToolCall { id, name, args: parsed };
            let mut on_event = |lc: ToolLifecycle| match lc {
                ToolLifecycle::Start { id, name } => sink.tool_start(&id, &name),
                ToolLifecycle::Finish { id, name, is_err, .. } => {
                    sink.tool_finish(&id, &name, is_err)
                }
            };
            let out = self
                .tools
                .dispatch(&call, self.cfg.tool_mask, &mut on_event)
                .await;
            self.emit(
                sink,
                Ev::ToolResult {
                    id: call.id.clone(),
                    out: out.content.clone(),
                    is_err: out.is_error,
                },
            )?;
            self.history
                .push(Msg::tool_result(&call.id, &out.content, out.is_error));
        }
        Ok(())
    }

    fn build_request(&self) -> Req {
        let tools: Vec<ToolDef> = self
            .tools
            .schemas(self.cfg.tool_mask)
            .into_iter()
            .map(|s| ToolDef { name: s.name, description: s.description, schema: s.parameters })
            .collect();
        Req {
            model: self.cfg.model.clone(),
            provider: None,
            msgs: self.history.clone(),
            tools,
            opts: self.cfg.opts.clone(),
        }
    }

    /// Sink first, then session — replay order must match on-screen order.
    fn emit(&mut self, sink: &mut dyn ModeSink, ev: Ev) -> anyhow::Result<()> {
        sink.push(&ev);
        self.writer
            .append(&SessionEvent::now(EventData::from(&ev)))
            .context("appending event to session")?;
        Ok(())
    }

    fn finish_canceled(&mut self, sink: &mut dyn ModeSink) -> anyhow::Result<StopReason> {
        self.emit(sink, Ev::Stop(StopReason::Canceled))?;
        Ok(StopReason::Canceled)
    }

    /// Update the persisted retry sidecar: one completed provider try,
    /// optionally failed. Bookkeeping only — a sidecar write failure is
    /// logged, not fatal, since the session append path already guards the
    /// directory.
    fn record_try(&mut self, failed: Option<ErrClass>) {
        let prev = load_retry(&self.session_dir, self.writer.sid())
            .ok()
            .flatten()
            .unwrap_or_else(|| RetryState::new(0, 0, 0, ErrClass::None));
        let state = RetryState::new(
            prev.tries_done + 1,
            prev.fail_ct + u32::from(failed.is_some()),
            0,
            failed.unwrap_or(ErrClass::None),
        );
        if let Err(e) = save_retry(&self.session_dir, self.writer.sid(), &state) {
            warn!("failed to persist retry state: {e}");
        }
    }

    fn maybe_compact(&mut self) -> anyhow::Result<()> {
        let lines = self.writer.line_count()?;
        if lines > self.cfg.compact_threshold_lines {
            let cp = compact_session(&self.session_dir, self.writer.sid())
                .context("compacting session")?;
            debug!(in_lines = cp.in_lines, out_lines = cp.out_lines, "session compacted");
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

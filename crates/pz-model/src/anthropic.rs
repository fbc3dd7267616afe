// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::provider::{Credential, CredentialSource, EventStream, Provider};
use crate::sanitize::{sanitize_utf8, status_error};
use crate::types::{Ev, Msg, Part, Req, Role, StopReason, Thinking, Usage};

/// Requested output ceiling when the caller does not set one.
const DEFAULT_MAX_TOKENS: u32 = 16384;

/// Backoff for 429/5xx responses: `min(60s, 2s · 2^attempt)`, 3 retries.
const RETRY_BASE_MS: u64 = 2000;
const RETRY_MAX_MS: u64 = 60_000;
const MAX_RETRIES: u32 = 3;

/// Beta features required when authenticating with an OAuth token.
const OAUTH_BETAS: &str = "claude-code-20250219,oauth-2025-04-20";

pub struct AnthropicProvider {
    model: String,
    base_url: String,
    auth: Arc<dyn CredentialSource>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(model: String, auth: Arc<dyn CredentialSource>) -> Self {
        Self::with_base_url(model, auth, "https://api.anthropic.com".into())
    }

    pub fn with_base_url(
        model: String,
        auth: Arc<dyn CredentialSource>,
        base_url: String,
    ) -> Self {
        Self { model, base_url, auth, client: reqwest::Client::new() }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn start(&self, req: Req) -> anyhow::Result<EventStream> {
        let mut cred = self.auth.credential("anthropic").await?;

        // Proactive refresh: expired OAuth tokens are refreshed before the
        // request goes out. Best-effort — a 401 still gets one retry below.
        if cred.is_expired(now_ms()) {
            match self.auth.refresh("anthropic").await {
                Ok(fresh) => cred = fresh,
                Err(e) => warn!("proactive token refresh failed: {e}"),
            }
        }

        let body = build_request_body(&self.model, &req);
        debug!(model = %self.model, "sending anthropic request");

        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();
        let url = format!("{}/v1/messages", self.base_url);
        let auth = Arc::clone(&self.auth);
        tokio::spawn(run_exchange(client, url, auth, cred, body, tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Drive one request with retry, refresh, and SSE decoding.
///
/// Terminal failures are surfaced in-band as `Err` + `Stop(Err)` events so
/// the consumer always observes exactly one stop.
async fn run_exchange(
    client: reqwest::Client,
    url: String,
    auth: Arc<dyn CredentialSource>,
    mut cred: Credential,
    body: Value,
    tx: mpsc::Sender<anyhow::Result<Ev>>,
) {
    let mut attempt: u32 = 0;
    let mut refreshed = false;
    loop {
        let mut builder = client
            .post(&url)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json");
        builder = match &cred {
            Credential::ApiKey(key) => builder.header("x-api-key", key),
            Credential::OAuth { access, .. } => builder
                .header("authorization", format!("Bearer {access}"))
                .header("anthropic-beta", OAUTH_BETAS),
        };

        let resp = match builder.json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                if attempt < MAX_RETRIES {
                    backoff_sleep(attempt).await;
                    attempt += 1;
                    continue;
                }
                fail(&tx, format!("anthropic request failed: {e}")).await;
                return;
            }
        };

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            // Drain and close before backing off so the connection can be
            // reused cleanly.
            let _ = resp.bytes().await;
            if attempt < MAX_RETRIES {
                debug!(status = status.as_u16(), attempt, "anthropic retryable status");
                backoff_sleep(attempt).await;
                attempt += 1;
                continue;
            }
            fail(&tx, status_error(status.as_u16(), b"retries exhausted")).await;
            return;
        }

        if status.as_u16() == 401 && cred.is_oauth() && !refreshed {
            refreshed = true;
            match auth.refresh("anthropic").await {
                Ok(fresh) => {
                    cred = fresh;
                    continue; // exactly one retry with fresh headers
                }
                Err(e) => {
                    fail(&tx, format!("401 token refresh failed: {e}")).await;
                    return;
                }
            }
        }

        if !status.is_success() {
            let bytes = resp.bytes().await.unwrap_or_default();
            fail(&tx, status_error(status.as_u16(), &bytes)).await;
            return;
        }

        stream_sse(resp, &tx).await;
        return;
    }
}

async fn backoff_sleep(attempt: u32) {
    let ms = RETRY_MAX_MS.min(RETRY_BASE_MS.saturating_mul(1u64 << attempt.min(32)));
    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
}

async fn fail(tx: &mpsc::Sender<anyhow::Result<Ev>>, msg: String) {
    let _ = tx.send(Ok(Ev::Err(msg))).await;
    let _ = tx.send(Ok(Ev::Stop(StopReason::Err))).await;
}

/// Forward decoded SSE events until the byte stream ends.
///
/// SSE lines can split across TCP chunks, so a remainder buffer carries the
/// trailing partial line into the next chunk.
async fn stream_sse(resp: reqwest::Response, tx: &mpsc::Sender<anyhow::Result<Ev>>) {
    let mut bytes = resp.bytes_stream();
    let mut buf = String::new();
    let mut dec = MessagesDecoder::default();
    while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
            Ok(b) => b,
            Err(e) => {
                fail(tx, format!("stream broken: {e}")).await;
                return;
            }
        };
        buf.push_str(&sanitize_utf8(&chunk));
        while let Some(pos) = buf.find('\n') {
            let line = buf[..pos].trim_end_matches('\r').to_string();
            buf.drain(..=pos);
            let Some(data) = line.strip_prefix("data: ") else { continue };
            let data = data.trim();
            if data == "[DONE]" {
                continue;
            }
            if let Ok(v) = serde_json::from_str::<Value>(data) {
                for ev in dec.handle(&v) {
                    if tx.send(Ok(ev)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
    for ev in dec.finish() {
        let _ = tx.send(Ok(ev)).await;
    }
}

// ─── SSE event decoding ───────────────────────────────────────────────────────

/// Stateful decoder for the Messages API event stream.
///
/// Input token and cache counters arrive in `message_start` and must be
/// preserved into the usage event emitted at `message_delta`; the stop
/// reason from `message_delta` is queued and emitted once the message ends.
#[derive(Default)]
pub(crate) struct MessagesDecoder {
    in_tok: u64,
    cache_read: u64,
    cache_write: u64,
    tool: Option<ToolAcc>,
    pending_stop: Option<StopReason>,
    stopped: bool,
}

#[derive(Default)]
struct ToolAcc {
    id: String,
    name: String,
    args: String,
}

impl MessagesDecoder {
    pub(crate) fn handle(&mut self, v: &Value) -> Vec<Ev> {
        match v["type"].as_str().unwrap_or("") {
            "message_start" => {
                if let Some(usage) = v["message"].get("usage") {
                    self.in_tok = usage["input_tokens"].as_u64().unwrap_or(0);
                    self.cache_read = usage["cache_read_input_tokens"].as_u64().unwrap_or(0);
                    self.cache_write = usage["cache_creation_input_tokens"].as_u64().unwrap_or(0);
                }
                vec![]
            }
            "content_block_start" => {
                let block = &v["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.tool = Some(ToolAcc {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        args: String::new(),
                    });
                }
                vec![]
            }
            "content_block_delta" => {
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or("");
                        if text.is_empty() {
                            vec![]
                        } else {
                            vec![Ev::Text(text.to_string())]
                        }
                    }
                    "thinking_delta" => {
                        let t = delta["thinking"].as_str().unwrap_or("");
                        if t.is_empty() {
                            vec![]
                        } else {
                            vec![Ev::Thinking(t.to_string())]
                        }
                    }
                    "input_json_delta" => {
                        if let Some(tool) = self.tool.as_mut() {
                            tool.args.push_str(delta["partial_json"].as_str().unwrap_or(""));
                        }
                        vec![]
                    }
                    // signature_delta carries an integrity blob, never text.
                    _ => vec![],
                }
            }
            "content_block_stop" => match self.tool.take() {
                Some(t) => vec![Ev::ToolCall { id: t.id, name: t.name, args: t.args }],
                None => vec![],
            },
            "message_delta" => {
                let mut events = Vec::new();
                if let Some(usage) = v.get("usage") {
                    let out = usage["output_tokens"].as_u64().unwrap_or(0);
                    events.push(Ev::Usage(Usage {
                        in_tok: self.in_tok,
                        out_tok: out,
                        tot_tok: self.in_tok + out,
                        cache_read: self.cache_read,
                        cache_write: self.cache_write,
                    }));
                }
                if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                    self.pending_stop = Some(match reason {
                        "max_tokens" => StopReason::MaxOut,
                        "tool_use" => StopReason::Tool,
                        _ => StopReason::Done, // end_turn and anything future
                    });
                }
                events
            }
            "message_stop" => self.emit_stop(),
            _ => vec![],
        }
    }

    /// Flush the queued stop when the transport ends without `message_stop`.
    pub(crate) fn finish(&mut self) -> Vec<Ev> {
        if self.pending_stop.is_some() {
            self.emit_stop()
        } else {
            vec![]
        }
    }

    fn emit_stop(&mut self) -> Vec<Ev> {
        if self.stopped {
            return vec![];
        }
        self.stopped = true;
        vec![Ev::Stop(self.pending_stop.take().unwrap_or(StopReason::Done))]
    }
}

// ─── Request building ─────────────────────────────────────────────────────────

/// Convert a [`Req`] into the Messages API body.
///
/// System messages become a top-level `system` array with `cache_control`
/// on the last block only; tool-role messages are rewritten as `user`
/// messages carrying `tool_result` blocks; consecutive messages that land
/// on the same wire role are merged into one entry.
pub(crate) fn build_request_body(model: &str, req: &Req) -> Value {
    let mut system_blocks: Vec<Value> = Vec::new();
    // (wire_role, content blocks) before merging
    let mut wire: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for m in &req.msgs {
        if m.role == Role::System {
            for p in &m.parts {
                if let Part::Text { text } = p {
                    system_blocks.push(json!({ "type": "text", "text": text }));
                }
            }
            continue;
        }
        let role = match m.role {
            Role::Assistant => "assistant",
            // Tool results travel back as user content on this wire.
            Role::User | Role::Tool => "user",
            Role::System => unreachable!(),
        };
        let blocks = message_blocks(m);
        if blocks.is_empty() {
            continue;
        }
        match wire.last_mut() {
            Some((last_role, content)) if *last_role == role => content.extend(blocks),
            _ => wire.push((role, blocks)),
        }
    }

    if let Some(last) = system_blocks.last_mut() {
        last["cache_control"] = json!({ "type": "ephemeral" });
    }

    let messages: Vec<Value> = wire
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect();

    let mut max_tokens = req.opts.max_out.unwrap_or(DEFAULT_MAX_TOKENS);
    let budget = req.opts.thinking_budget.unwrap_or(0);
    if budget > 0 && budget >= max_tokens {
        max_tokens = budget + DEFAULT_MAX_TOKENS;
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "stream": true,
    });
    if !system_blocks.is_empty() {
        body["system"] = json!(system_blocks);
    }
    if let Some(t) = req.opts.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = req.opts.top_p {
        body["top_p"] = json!(p);
    }
    if !req.opts.stop.is_empty() {
        body["stop_sequences"] = json!(req.opts.stop);
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.schema,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    // Extended thinking is only understood by opus- and sonnet-4-class
    // models; sending it to anything else is a 400.
    if req.opts.thinking != Thinking::Off
        && (model.contains("opus") || model.contains("sonnet-4"))
    {
        let thinking_budget = if budget > 0 { budget } else { 8192 };
        body["thinking"] = json!({ "type": "enabled", "budget_tokens": thinking_budget });
    }
    body
}

fn message_blocks(m: &Msg) -> Vec<Value> {
    m.parts
        .iter()
        .map(|p| match p {
            Part::Text { text } => json!({ "type": "text", "text": text }),
            Part::ToolCall { id, name, args } => json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": serde_json::from_str::<Value>(args).unwrap_or(json!({})),
            }),
            Part::ToolResult { id, out, is_err } => {
                let mut block = json!({
                    "type": "tool_result",
                    "tool_use_id": id,
                    "content": out,
                });
                if *is_err {
                    block["is_error"] = json!(true);
                }
                block
            }
        })
        .collect()
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(dec: &mut MessagesDecoder, lines: &[Value]) -> Vec<Ev> {
        let mut out = Vec::new();
        for l in lines {
            out.extend(dec.handle(l));
        }
        out.extend(dec.finish());
        out
    }

    // ── SSE decoding ──────────────────────────────────────────────────────────

    #[test]
    fn tool_use_lifecycle_accumulates_arguments() {
        let mut dec = MessagesDecoder::default();
        let events = decode_all(
            &mut dec,
            &[
                json!({
                    "type": "content_block_start",
                    "index": 0,
                    "content_block": { "type": "tool_use", "id": "t1", "name": "bash" }
                }),
                json!({
                    "type": "content_block_delta",
                    "delta": { "type": "input_json_delta", "partial_json": "{\"cmd\":" }
                }),
                json!({
                    "type": "content_block_delta",
                    "delta": { "type": "input_json_delta", "partial_json": "\"ls\"}" }
                }),
                json!({ "type": "content_block_stop" }),
            ],
        );
        assert_eq!(
            events,
            vec![Ev::ToolCall {
                id: "t1".into(),
                name: "bash".into(),
                args: "{\"cmd\":\"ls\"}".into(),
            }]
        );
    }

    #[test]
    fn message_delta_usage_preserves_cache_counters() {
        let mut dec = MessagesDecoder::default();
        dec.handle(&json!({
            "type": "message_start",
            "message": {
                "usage": {
                    "input_tokens": 100,
                    "cache_read_input_tokens": 80,
                    "cache_creation_input_tokens": 20
                }
            }
        }));
        let events = dec.handle(&json!({
            "type": "message_delta",
            "delta": { "stop_reason": "end_turn" },
            "usage": { "output_tokens": 9 }
        }));
        assert_eq!(
            events,
            vec![Ev::Usage(Usage {
                in_tok: 100,
                out_tok: 9,
                tot_tok: 109,
                cache_read: 80,
                cache_write: 20,
            })]
        );
    }

    #[test]
    fn queued_stop_flushes_at_message_stop() {
        let mut dec = MessagesDecoder::default();
        dec.handle(&json!({
            "type": "message_delta",
            "delta": { "stop_reason": "tool_use" },
            "usage": { "output_tokens": 1 }
        }));
        let events = dec.handle(&json!({ "type": "message_stop" }));
        assert_eq!(events, vec![Ev::Stop(StopReason::Tool)]);
        // A second message_stop must not emit a second stop.
        assert!(dec.handle(&json!({ "type": "message_stop" })).is_empty());
    }

    #[test]
    fn queued_stop_flushes_at_finish_without_message_stop() {
        let mut dec = MessagesDecoder::default();
        dec.handle(&json!({
            "type": "message_delta",
            "delta": { "stop_reason": "max_tokens" },
            "usage": { "output_tokens": 2 }
        }));
        assert_eq!(dec.finish(), vec![Ev::Stop(StopReason::MaxOut)]);
    }

    #[test]
    fn unknown_stop_reason_maps_to_done() {
        let mut dec = MessagesDecoder::default();
        dec.handle(&json!({
            "type": "message_delta",
            "delta": { "stop_reason": "pause_turn" }
        }));
        assert_eq!(dec.finish(), vec![Ev::Stop(StopReason::Done)]);
    }

    #[test]
    fn text_and_thinking_deltas_map_directly() {
        let mut dec = MessagesDecoder::default();
        let t = dec.handle(&json!({
            "type": "content_block_delta",
            "delta": { "type": "text_delta", "text": "hello" }
        }));
        assert_eq!(t, vec![Ev::Text("hello".into())]);
        let th = dec.handle(&json!({
            "type": "content_block_delta",
            "delta": { "type": "thinking_delta", "thinking": "hmm" }
        }));
        assert_eq!(th, vec![Ev::Thinking("hmm".into())]);
    }

    #[test]
    fn signature_delta_is_silently_discarded() {
        let mut dec = MessagesDecoder::default();
        let events = dec.handle(&json!({
            "type": "content_block_delta",
            "delta": { "type": "signature_delta", "signature": "EqRkLm" }
        }));
        assert!(events.is_empty());
    }

    #[test]
    fn finish_without_any_stop_emits_nothing() {
        // Leaving the no-stop case to the caller keeps broken-stream
        // handling (err + stop(err)) in one place.
        let mut dec = MessagesDecoder::default();
        dec.handle(&json!({
            "type": "content_block_delta",
            "delta": { "type": "text_delta", "text": "partial" }
        }));
        assert!(dec.finish().is_empty());
    }

    // ── Request building ──────────────────────────────────────────────────────

    fn req_with(msgs: Vec<Msg>) -> Req {
        Req { model: "claude-haiku-3-5".into(), msgs, ..Default::default() }
    }

    #[test]
    fn system_messages_become_system_array_with_cache_control_on_last() {
        let req = req_with(vec![
            Msg::system("first"),
            Msg::system("second"),
            Msg::user("hi"),
        ]);
        let body = build_request_body("m", &req);
        let system = body["system"].as_array().unwrap();
        assert_eq!(system.len(), 2);
        assert!(system[0].get("cache_control").is_none());
        assert_eq!(system[1]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn consecutive_same_role_messages_are_merged() {
        let req = req_with(vec![Msg::user("one"), Msg::user("two"), Msg::assistant("a")]);
        let body = build_request_body("m", &req);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        let first = messages[0]["content"].as_array().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0]["text"], "one");
        assert_eq!(first[1]["text"], "two");
    }

    #[test]
    fn tool_role_is_rewritten_as_user_tool_result() {
        let req = req_with(vec![
            Msg::user("go"),
            Msg::tool_call("t1", "bash", r#"{"cmd":"ls"}"#),
            Msg::tool_result("t1", "files", true),
        ]);
        let body = build_request_body("m", &req);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"][0]["type"], "tool_use");
        assert_eq!(messages[1]["content"][0]["input"]["cmd"], "ls");
        assert_eq!(messages[2]["role"], "user");
        let tr = &messages[2]["content"][0];
        assert_eq!(tr["type"], "tool_result");
        assert_eq!(tr["tool_use_id"], "t1");
        assert_eq!(tr["is_error"], true);
    }

    #[test]
    fn tool_result_without_error_omits_is_error() {
        let req = req_with(vec![Msg::tool_result("t1", "ok", false)]);
        let body = build_request_body("m", &req);
        let tr = &body["messages"][0]["content"][0];
        assert!(tr.get("is_error").is_none());
    }

    #[test]
    fn max_tokens_defaults_to_16384() {
        let body = build_request_body("m", &req_with(vec![Msg::user("x")]));
        assert_eq!(body["max_tokens"], 16384);
    }

    #[test]
    fn max_tokens_honours_explicit_max_out() {
        let mut req = req_with(vec![Msg::user("x")]);
        req.opts.max_out = Some(2048);
        let body = build_request_body("m", &req);
        assert_eq!(body["max_tokens"], 2048);
    }

    #[test]
    fn oversized_thinking_budget_raises_max_tokens() {
        let mut req = req_with(vec![Msg::user("x")]);
        req.opts.thinking = Thinking::Budget;
        req.opts.thinking_budget = Some(32768);
        let body = build_request_body("claude-opus-4-5", &req);
        assert_eq!(body["max_tokens"], 32768 + 16384);
        assert_eq!(body["thinking"]["budget_tokens"], 32768);
    }

    #[test]
    fn thinking_only_for_opus_and_sonnet_4_models() {
        let mut req = req_with(vec![Msg::user("x")]);
        req.opts.thinking = Thinking::Adaptive;
        assert!(build_request_body("claude-opus-4-5", &req).get("thinking").is_some());
        assert!(build_request_body("claude-sonnet-4-5", &req).get("thinking").is_some());
        assert!(build_request_body("claude-haiku-3-5", &req).get("thinking").is_none());
    }

    #[test]
    fn thinking_off_is_never_sent() {
        let req = req_with(vec![Msg::user("x")]);
        assert!(build_request_body("claude-opus-4-5", &req).get("thinking").is_none());
    }

    #[test]
    fn tools_are_serialized_with_input_schema() {
        let mut req = req_with(vec![Msg::user("x")]);
        req.tools.push(crate::types::ToolDef {
            name: "read".into(),
            description: "read a file".into(),
            schema: json!({ "type": "object" }),
        });
        let body = build_request_body("m", &req);
        assert_eq!(body["tools"][0]["name"], "read");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn stop_sequences_and_sampling_options_pass_through() {
        let mut req = req_with(vec![Msg::user("x")]);
        req.opts.temperature = Some(0.5);
        req.opts.top_p = Some(0.25);
        req.opts.stop = vec!["END".into()];
        let body = build_request_body("m", &req);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["top_p"], 0.25);
        assert_eq!(body["stop_sequences"][0], "END");
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::provider::{Credential, CredentialSource, EventStream, Provider};
use crate::sanitize::{sanitize_utf8, status_error};
use crate::types::{Ev, Part, Req, Role, StopReason, Thinking, Usage};

/// Backoff for 429/5xx responses: `min(60s, 2s · 2^attempt)`, 3 retries.
const RETRY_BASE_MS: u64 = 2000;
const RETRY_MAX_MS: u64 = 60_000;
const MAX_RETRIES: u32 = 3;

pub struct OpenAiProvider {
    model: String,
    base_url: String,
    auth: Arc<dyn CredentialSource>,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(model: String, auth: Arc<dyn CredentialSource>) -> Self {
        Self::with_base_url(model, auth, "https://api.openai.com".into())
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
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn start(&self, req: Req) -> anyhow::Result<EventStream> {
        let mut cred = self.auth.credential("openai").await?;
        if cred.is_expired(now_ms()) {
            match self.auth.refresh("openai").await {
                Ok(fresh) => cred = fresh,
                Err(e) => warn!("proactive token refresh failed: {e}"),
            }
        }

        let body = build_request_body(&self.model, &req);
        debug!(model = %self.model, "sending openai responses request");

        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();
        let url = format!("{}/v1/responses", self.base_url);
        let auth = Arc::clone(&self.auth);
        tokio::spawn(run_exchange(client, url, auth, cred, body, tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

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
        let token = match &cred {
            Credential::ApiKey(k) => k.clone(),
            Credential::OAuth { access, .. } => access.clone(),
        };
        let resp = match client
            .post(&url)
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                if attempt < MAX_RETRIES {
                    backoff_sleep(attempt).await;
                    attempt += 1;
                    continue;
                }
                fail(&tx, format!("openai request failed: {e}")).await;
                return;
            }
        };

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let _ = resp.bytes().await;
            if attempt < MAX_RETRIES {
                debug!(status = status.as_u16(), attempt, "openai retryable status");
                backoff_sleep(attempt).await;
                attempt += 1;
                continue;
            }
            fail(&tx, status_error(status.as_u16(), b"retries exhausted")).await;
            return;
        }

        if status.as_u16() == 401 && cred.is_oauth() && !refreshed {
            refreshed = true;
            match auth.refresh("openai").await {
                Ok(fresh) => {
                    cred = fresh;
                    continue;
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

async fn stream_sse(resp: reqwest::Response, tx: &mpsc::Sender<anyhow::Result<Ev>>) {
    let mut bytes = resp.bytes_stream();
    let mut buf = String::new();
    let mut dec = ResponsesDecoder::default();
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
}

// ─── SSE event decoding ───────────────────────────────────────────────────────

/// Stateful decoder for the Responses API event stream.
///
/// Function-call items stream their arguments separately from their
/// lifecycle events, keyed by item id; the completed call is emitted at
/// `response.output_item.done` with the composite `call_id|item_id` id so
/// the serializer can recover both halves on the next turn.
#[derive(Default)]
pub(crate) struct ResponsesDecoder {
    calls: HashMap<String, FnCallAcc>,
    saw_function_call: bool,
    stopped: bool,
}

#[derive(Default)]
struct FnCallAcc {
    call_id: String,
    name: String,
    args: String,
}

impl ResponsesDecoder {
    pub(crate) fn handle(&mut self, v: &Value) -> Vec<Ev> {
        match v["type"].as_str().unwrap_or("") {
            "response.output_item.added" => {
                let item = &v["item"];
                if item["type"].as_str() == Some("function_call") {
                    let item_id = item["id"].as_str().unwrap_or("").to_string();
                    self.calls.insert(
                        item_id,
                        FnCallAcc {
                            call_id: item["call_id"].as_str().unwrap_or("").to_string(),
                            name: item["name"].as_str().unwrap_or("").to_string(),
                            args: item["arguments"].as_str().unwrap_or("").to_string(),
                        },
                    );
                }
                vec![]
            }
            "response.function_call_arguments.delta" => {
                let item_id = v["item_id"].as_str().unwrap_or("");
                if let Some(acc) = self.calls.get_mut(item_id) {
                    acc.args.push_str(v["delta"].as_str().unwrap_or(""));
                }
                vec![]
            }
            "response.function_call_arguments.done" => {
                let item_id = v["item_id"].as_str().unwrap_or("");
                if let Some(acc) = self.calls.get_mut(item_id) {
                    if let Some(full) = v["arguments"].as_str() {
                        acc.args = full.to_string();
                    }
                }
                vec![]
            }
            "response.output_item.done" => {
                let item = &v["item"];
                if item["type"].as_str() != Some("function_call") {
                    return vec![];
                }
                let item_id = item["id"].as_str().unwrap_or("");
                let acc = self.calls.remove(item_id).unwrap_or_else(|| FnCallAcc {
                    call_id: item["call_id"].as_str().unwrap_or("").to_string(),
                    name: item["name"].as_str().unwrap_or("").to_string(),
                    args: item["arguments"].as_str().unwrap_or("").to_string(),
                });
                self.saw_function_call = true;
                vec![Ev::ToolCall {
                    id: format!("{}|{}", acc.call_id, item_id),
                    name: acc.name,
                    args: acc.args,
                }]
            }
            "response.output_text.delta" | "response.refusal.delta" => {
                match v["delta"].as_str() {
                    Some(d) if !d.is_empty() => vec![Ev::Text(d.to_string())],
                    _ => vec![],
                }
            }
            "response.reasoning_summary_text.delta" => match v["delta"].as_str() {
                Some(d) if !d.is_empty() => vec![Ev::Thinking(d.to_string())],
                _ => vec![],
            },
            "response.completed" => {
                let mut events = Vec::new();
                let resp = &v["response"];
                if let Some(usage) = resp.get("usage") {
                    let in_tok = usage["input_tokens"].as_u64().unwrap_or(0);
                    let out_tok = usage["output_tokens"].as_u64().unwrap_or(0);
                    let tot = usage["total_tokens"].as_u64().unwrap_or(in_tok + out_tok);
                    events.push(Ev::Usage(Usage {
                        in_tok,
                        out_tok,
                        tot_tok: tot,
                        cache_read: usage["input_tokens_details"]["cached_tokens"]
                            .as_u64()
                            .unwrap_or(0),
                        cache_write: 0,
                    }));
                }
                let mut reason = match resp["status"].as_str().unwrap_or("completed") {
                    "incomplete" => StopReason::MaxOut,
                    "cancelled" => StopReason::Canceled,
                    "failed" => StopReason::Err,
                    _ => StopReason::Done,
                };
                // A turn that produced function calls needs tool dispatch even
                // though the response itself completed.
                if reason == StopReason::Done && self.saw_function_call {
                    reason = StopReason::Tool;
                }
                events.extend(self.emit_stop(reason));
                events
            }
            "response.failed" => {
                let msg = v["response"]["error"]["message"]
                    .as_str()
                    .unwrap_or("response failed")
                    .to_string();
                let mut events = vec![Ev::Err(msg)];
                events.extend(self.emit_stop(StopReason::Err));
                events
            }
            "error" => {
                let msg = v["message"].as_str().unwrap_or("stream error").to_string();
                let mut events = vec![Ev::Err(msg)];
                events.extend(self.emit_stop(StopReason::Err));
                events
            }
            _ => vec![],
        }
    }

    fn emit_stop(&mut self, reason: StopReason) -> Vec<Ev> {
        if self.stopped {
            return vec![];
        }
        self.stopped = true;
        vec![Ev::Stop(reason)]
    }
}

// ─── Request building ─────────────────────────────────────────────────────────

/// Strip the `|item_id` suffix from a composite tool id.
fn call_id_of(id: &str) -> &str {
    id.split('|').next().unwrap_or(id)
}

/// Convert a [`Req`] into the Responses API body.
pub(crate) fn build_request_body(model: &str, req: &Req) -> Value {
    let mut input: Vec<Value> = Vec::new();
    for m in &req.msgs {
        match m.role {
            Role::System => {
                for p in &m.parts {
                    if let Part::Text { text } = p {
                        input.push(json!({
                            "type": "message",
                            "role": "developer",
                            "content": [{ "type": "input_text", "text": text }],
                        }));
                    }
                }
            }
            Role::User => {
                for p in &m.parts {
                    if let Part::Text { text } = p {
                        input.push(json!({
                            "type": "message",
                            "role": "user",
                            "content": [{ "type": "input_text", "text": text }],
                        }));
                    }
                }
            }
            Role::Assistant => {
                for p in &m.parts {
                    match p {
                        Part::Text { text } => input.push(json!({
                            "type": "message",
                            "role": "assistant",
                            "status": "completed",
                            "content": [{ "type": "output_text", "text": text }],
                        })),
                        Part::ToolCall { id, name, args } => input.push(json!({
                            "type": "function_call",
                            "call_id": call_id_of(id),
                            "name": name,
                            "arguments": args,
                        })),
                        Part::ToolResult { .. } => {}
                    }
                }
            }
            Role::Tool => {
                for p in &m.parts {
                    if let Part::ToolResult { id, out, .. } = p {
                        input.push(json!({
                            "type": "function_call_output",
                            "call_id": call_id_of(id),
                            "output": out,
                        }));
                    }
                }
            }
        }
    }

    let mut body = json!({
        "model": model,
        "input": input,
        "stream": true,
        "store": false,
    });
    if let Some(t) = req.opts.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = req.opts.top_p {
        body["top_p"] = json!(p);
    }
    if let Some(m) = req.opts.max_out {
        body["max_output_tokens"] = json!(m);
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.schema,
                    "strict": false,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    if let Some(effort) = reasoning_effort(&req.opts.thinking, req.opts.thinking_budget) {
        body["reasoning"] = json!({ "effort": effort });
    }
    body
}

/// Map the thinking options onto the Responses reasoning-effort ladder.
fn reasoning_effort(thinking: &Thinking, budget: Option<u32>) -> Option<&'static str> {
    match thinking {
        Thinking::Off => None,
        Thinking::Adaptive => Some("medium"),
        Thinking::Budget => Some(match budget.unwrap_or(0) {
            0..=1024 => "minimal",
            1025..=4096 => "low",
            4097..=16384 => "medium",
            _ => "high",
        }),
    }
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
    use crate::types::{Msg, ToolDef};

    // ── SSE decoding ──────────────────────────────────────────────────────────

    #[test]
    fn function_call_lifecycle_emits_composite_id() {
        let mut dec = ResponsesDecoder::default();
        dec.handle(&json!({
            "type": "response.output_item.added",
            "item": { "type": "function_call", "id": "item_9", "call_id": "call_1", "name": "bash" }
        }));
        dec.handle(&json!({
            "type": "response.function_call_arguments.delta",
            "item_id": "item_9",
            "delta": "{\"cmd\":"
        }));
        dec.handle(&json!({
            "type": "response.function_call_arguments.delta",
            "item_id": "item_9",
            "delta": "\"ls\"}"
        }));
        let events = dec.handle(&json!({
            "type": "response.output_item.done",
            "item": { "type": "function_call", "id": "item_9", "call_id": "call_1", "name": "bash" }
        }));
        assert_eq!(
            events,
            vec![Ev::ToolCall {
                id: "call_1|item_9".into(),
                name: "bash".into(),
                args: "{\"cmd\":\"ls\"}".into(),
            }]
        );
    }

    #[test]
    fn arguments_done_replaces_accumulated_deltas() {
        let mut dec = ResponsesDecoder::default();
        dec.handle(&json!({
            "type": "response.output_item.added",
            "item": { "type": "function_call", "id": "i", "call_id": "c", "name": "read" }
        }));
        dec.handle(&json!({
            "type": "response.function_call_arguments.delta",
            "item_id": "i",
            "delta": "{\"pat"
        }));
        dec.handle(&json!({
            "type": "response.function_call_arguments.done",
            "item_id": "i",
            "arguments": "{\"path\":\"a.txt\"}"
        }));
        let events = dec.handle(&json!({
            "type": "response.output_item.done",
            "item": { "type": "function_call", "id": "i", "call_id": "c", "name": "read" }
        }));
        assert_eq!(
            events,
            vec![Ev::ToolCall {
                id: "c|i".into(),
                name: "read".into(),
                args: "{\"path\":\"a.txt\"}".into(),
            }]
        );
    }

    #[test]
    fn output_text_and_refusal_deltas_are_text() {
        let mut dec = ResponsesDecoder::default();
        assert_eq!(
            dec.handle(&json!({ "type": "response.output_text.delta", "delta": "hi" })),
            vec![Ev::Text("hi".into())]
        );
        assert_eq!(
            dec.handle(&json!({ "type": "response.refusal.delta", "delta": "no" })),
            vec![Ev::Text("no".into())]
        );
    }

    #[test]
    fn reasoning_summary_delta_is_thinking() {
        let mut dec = ResponsesDecoder::default();
        assert_eq!(
            dec.handle(&json!({
                "type": "response.reasoning_summary_text.delta",
                "delta": "considering"
            })),
            vec![Ev::Thinking("considering".into())]
        );
    }

    #[test]
    fn completed_reads_usage_with_cached_tokens() {
        let mut dec = ResponsesDecoder::default();
        let events = dec.handle(&json!({
            "type": "response.completed",
            "response": {
                "status": "completed",
                "usage": {
                    "input_tokens": 50,
                    "output_tokens": 10,
                    "total_tokens": 60,
                    "input_tokens_details": { "cached_tokens": 30 }
                }
            }
        }));
        assert_eq!(
            events,
            vec![
                Ev::Usage(Usage {
                    in_tok: 50,
                    out_tok: 10,
                    tot_tok: 60,
                    cache_read: 30,
                    cache_write: 0,
                }),
                Ev::Stop(StopReason::Done),
            ]
        );
    }

    #[test]
    fn completed_after_function_call_upgrades_to_tool_stop() {
        let mut dec = ResponsesDecoder::default();
        dec.handle(&json!({
            "type": "response.output_item.done",
            "item": { "type": "function_call", "id": "i", "call_id": "c", "name": "ls" }
        }));
        let events = dec.handle(&json!({
            "type": "response.completed",
            "response": { "status": "completed" }
        }));
        assert_eq!(events, vec![Ev::Stop(StopReason::Tool)]);
    }

    #[test]
    fn incomplete_and_cancelled_statuses_map_directly() {
        let mut dec = ResponsesDecoder::default();
        let events = dec.handle(&json!({
            "type": "response.completed",
            "response": { "status": "incomplete" }
        }));
        assert_eq!(events, vec![Ev::Stop(StopReason::MaxOut)]);

        let mut dec = ResponsesDecoder::default();
        let events = dec.handle(&json!({
            "type": "response.completed",
            "response": { "status": "cancelled" }
        }));
        assert_eq!(events, vec![Ev::Stop(StopReason::Canceled)]);
    }

    #[test]
    fn failed_response_emits_err_then_stop() {
        let mut dec = ResponsesDecoder::default();
        let events = dec.handle(&json!({
            "type": "response.failed",
            "response": { "error": { "message": "overloaded" } }
        }));
        assert_eq!(
            events,
            vec![Ev::Err("overloaded".into()), Ev::Stop(StopReason::Err)]
        );
    }

    #[test]
    fn error_event_emits_err_then_stop() {
        let mut dec = ResponsesDecoder::default();
        let events = dec.handle(&json!({ "type": "error", "message": "bad request" }));
        assert_eq!(
            events,
            vec![Ev::Err("bad request".into()), Ev::Stop(StopReason::Err)]
        );
    }

    #[test]
    fn stop_is_emitted_at_most_once() {
        let mut dec = ResponsesDecoder::default();
        dec.handle(&json!({ "type": "error", "message": "first" }));
        let again = dec.handle(&json!({
            "type": "response.completed",
            "response": { "status": "completed" }
        }));
        assert!(again.is_empty());
    }

    // ── Request building ──────────────────────────────────────────────────────

    #[test]
    fn system_role_maps_to_developer() {
        let req = Req {
            model: "gpt-5".into(),
            msgs: vec![Msg::system("rules"), Msg::user("hi")],
            ..Default::default()
        };
        let body = build_request_body("gpt-5", &req);
        assert_eq!(body["input"][0]["role"], "developer");
        assert_eq!(body["input"][0]["content"][0]["type"], "input_text");
        assert_eq!(body["input"][1]["role"], "user");
    }

    #[test]
    fn assistant_text_is_completed_output_text() {
        let req = Req {
            model: "gpt-5".into(),
            msgs: vec![Msg::assistant("answer")],
            ..Default::default()
        };
        let body = build_request_body("gpt-5", &req);
        let item = &body["input"][0];
        assert_eq!(item["status"], "completed");
        assert_eq!(item["content"][0]["type"], "output_text");
    }

    #[test]
    fn composite_tool_ids_are_stripped_on_the_wire() {
        let req = Req {
            model: "gpt-5".into(),
            msgs: vec![
                Msg::tool_call("call_1|item_9", "bash", "{}"),
                Msg::tool_result("call_1|item_9", "done", false),
            ],
            ..Default::default()
        };
        let body = build_request_body("gpt-5", &req);
        assert_eq!(body["input"][0]["type"], "function_call");
        assert_eq!(body["input"][0]["call_id"], "call_1");
        assert_eq!(body["input"][1]["type"], "function_call_output");
        assert_eq!(body["input"][1]["call_id"], "call_1");
    }

    #[test]
    fn store_is_always_false_and_stream_true() {
        let req = Req { model: "gpt-5".into(), msgs: vec![Msg::user("x")], ..Default::default() };
        let body = build_request_body("gpt-5", &req);
        assert_eq!(body["store"], false);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn tool_schemas_are_emitted_non_strict() {
        let req = Req {
            model: "gpt-5".into(),
            msgs: vec![Msg::user("x")],
            tools: vec![ToolDef {
                name: "grep".into(),
                description: "search".into(),
                schema: json!({ "type": "object" }),
            }],
            ..Default::default()
        };
        let body = build_request_body("gpt-5", &req);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["strict"], false);
    }

    #[test]
    fn reasoning_effort_ladder_matches_budget_thresholds() {
        use Thinking::*;
        assert_eq!(reasoning_effort(&Off, None), None);
        assert_eq!(reasoning_effort(&Adaptive, None), Some("medium"));
        assert_eq!(reasoning_effort(&Budget, Some(512)), Some("minimal"));
        assert_eq!(reasoning_effort(&Budget, Some(1024)), Some("minimal"));
        assert_eq!(reasoning_effort(&Budget, Some(4096)), Some("low"));
        assert_eq!(reasoning_effort(&Budget, Some(16384)), Some("medium"));
        assert_eq!(reasoning_effort(&Budget, Some(16385)), Some("high"));
    }
}

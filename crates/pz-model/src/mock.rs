// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::provider::{EventStream, Provider};
use crate::types::{Ev, Req, StopReason, Usage};

/// A pre-scripted provider. Each call to `start` pops the next event script
/// from the front of the queue, so tests can specify exact sequences —
/// including tool calls — without network access.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Vec<Ev>>>,
    /// The last request seen, for assertions on what the loop sent.
    pub last_request: Arc<Mutex<Option<Req>>>,
}

impl ScriptedProvider {
    /// Outer Vec: ordered list of calls; inner Vec: events for that call.
    pub fn new(scripts: Vec<Vec<Ev>>) -> Self {
        Self { scripts: Mutex::new(scripts), last_request: Arc::new(Mutex::new(None)) }
    }

    /// Convenience: provider that always answers with a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            Ev::Text(r),
            Ev::Usage(Usage { in_tok: 5, out_tok: 5, tot_tok: 10, ..Default::default() }),
            Ev::Stop(StopReason::Done),
        ]])
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }
    fn model_name(&self) -> &str {
        "scripted-model"
    }

    async fn start(&self, req: Req) -> anyhow::Result<EventStream> {
        *self.last_request.lock().unwrap() = Some(req);
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            anyhow::bail!("scripted provider exhausted");
        }
        let events = scripts.remove(0);
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Generic client: canonical JSON envelope over an opaque byte transport.
//!
//! This is the path used for external provider commands: the request is
//! serialized once, handed to the transport, and the reply is parsed by the
//! streaming runner as canonical `tag:value` frames.

use async_trait::async_trait;
use futures::stream;

use crate::error::WireError;
use crate::provider::{EventStream, Provider};
use crate::retry::RetryPolicy;
use crate::runner::{run_stream, ChunkTransport, Sleeper, TokioSleeper};
use crate::types::Req;

/// Serialize a request into the canonical wire envelope.
///
/// Field order is fixed by the struct declaration (`model`, `provider`,
/// `msgs`, `tools`, `opts`), so equal requests always produce identical
/// bytes — providers may hash or cache on the envelope.
pub fn encode_envelope(req: &Req) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(req).map_err(|e| WireError::BadFrame(format!("encode envelope: {e}")))
}

/// Provider implementation over any [`ChunkTransport`].
pub struct GenericProvider<T> {
    label: String,
    model: String,
    transport: T,
    policy: RetryPolicy,
}

impl<T: ChunkTransport> GenericProvider<T> {
    pub fn new(label: impl Into<String>, model: impl Into<String>, transport: T, policy: RetryPolicy) -> Self {
        Self { label: label.into(), model: model.into(), transport, policy }
    }

    /// Buffered run with an injectable sleeper (tests record waits).
    pub async fn run_with_sleeper(
        &self,
        req: &Req,
        sleeper: &dyn Sleeper,
    ) -> Result<crate::runner::RunOutcome, WireError> {
        let envelope = encode_envelope(req)?;
        run_stream(&self.transport, &envelope, self.policy, sleeper).await
    }
}

#[async_trait]
impl<T: ChunkTransport> Provider for GenericProvider<T> {
    fn name(&self) -> &str {
        &self.label
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn start(&self, req: Req) -> anyhow::Result<EventStream> {
        let outcome = self.run_with_sleeper(&req, &TokioSleeper).await?;
        Ok(Box::pin(stream::iter(outcome.events.into_iter().map(Ok))))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::types::{Ev, Req};

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<Ev>> + Send>>;

/// A model provider capable of streaming one completion.
///
/// Implementations handle their own wire-level retries (rate limits, token
/// refresh); terminal failures after the stream has opened are surfaced
/// in-band as an `Ev::Err` followed by `Ev::Stop(StopReason::Err)` so the
/// caller sees exactly one stop per turn.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider id for status display and credential lookup.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn start(&self, req: Req) -> anyhow::Result<EventStream>;
}

/// A stored credential for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    OAuth {
        access: String,
        refresh: String,
        expires_ms: i64,
    },
}

impl Credential {
    pub fn is_oauth(&self) -> bool {
        matches!(self, Self::OAuth { .. })
    }

    /// OAuth entries past their expiry are refresh candidates before any
    /// outbound request. API keys never expire.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        match self {
            Self::ApiKey(_) => false,
            Self::OAuth { expires_ms, .. } => *expires_ms <= now_ms,
        }
    }
}

/// Where provider clients obtain and refresh credentials.
///
/// The file-backed store lives in `pz-auth`; tests substitute scripted
/// sources so refresh paths can be exercised without a token endpoint.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Current credential for `provider`, refreshed proactively if expired.
    async fn credential(&self, provider: &str) -> anyhow::Result<Credential>;

    /// Force a refresh and return the new credential.
    async fn refresh(&self, provider: &str) -> anyhow::Result<Credential>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// The callback `state` did not match the PKCE verifier we sent.
    /// Possible CSRF or a crossed login attempt; nothing is persisted.
    #[error("OAuth state mismatch: callback state does not match this login attempt")]
    StateMismatch,

    /// The loopback listener failed or received an unusable request.
    #[error("OAuth callback failed: {0}")]
    Callback(String),

    /// The token endpoint rejected the exchange or refresh.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// No usable credential anywhere. The message names every accepted
    /// source so the user can fix it without reading docs.
    #[error(
        "no credential for {provider}; set {env_hint} or run `pz login {provider}`"
    )]
    MissingCredential { provider: String, env_hint: String },

    #[error("auth file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("auth file is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

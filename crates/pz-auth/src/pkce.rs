// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! PKCE (RFC 7636) challenge generation for the OAuth public-client flows.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// A PKCE code verifier and its corresponding S256 challenge.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Sent to the token endpoint (and doubling as the `state` parameter).
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`, sent to the authorization endpoint.
    pub challenge: String,
}

/// Generate a fresh verifier/challenge pair.
///
/// The verifier is 32 cryptographically random bytes, base64url-encoded
/// without padding.
pub fn generate() -> PkceChallenge {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);

    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(digest);

    PkceChallenge { verifier, challenge }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

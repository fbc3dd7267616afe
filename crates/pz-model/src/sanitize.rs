// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Error-body sanitization for terminal HTTP statuses.
//!
//! Provider error bodies are echoed into diagnostics and the session log,
//! so they must be valid UTF-8 before they travel any further.

/// Lossily decode `bytes`, replacing every invalid byte with `?`.
///
/// Unlike `String::from_utf8_lossy` this substitutes one ASCII `?` per bad
/// byte rather than a multi-byte replacement character, keeping diagnostics
/// plain-ASCII-safe for terminals and log scrapers.
pub fn sanitize_utf8(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(s) => {
                out.push_str(s);
                return out;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                // SAFETY: split at valid_up_to, checked by from_utf8 above.
                out.push_str(unsafe { std::str::from_utf8_unchecked(valid) });
                let bad = e.error_len().unwrap_or(after.len());
                for _ in 0..bad {
                    out.push('?');
                }
                rest = &after[bad..];
            }
        }
    }
}

/// Render a terminal HTTP failure as `"{status} {body}"` with the body
/// sanitized.
pub fn status_error(status: u16, body: &[u8]) -> String {
    format!("{} {}", status, sanitize_utf8(body))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

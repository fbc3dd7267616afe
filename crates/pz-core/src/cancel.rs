// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Cooperative cancellation.
//!
//! One atomic flag, single producer (the input watcher) and single consumer
//! (the agent loop). The loop polls between stream events and at turn
//! boundaries; setting the flag twice is harmless.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const ESC: u8 = 0x1b;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Watch `input` for a bare ESC byte and set the token.
///
/// The caller must have put the terminal in raw mode first — a cooked-mode
/// read would buffer until newline and never observe the lone ESC. Returns
/// when ESC is seen or the input ends.
pub fn watch_for_esc(mut input: impl Read, token: CancelToken) {
    let mut buf = [0u8; 64];
    loop {
        match input.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if buf[..n].contains(&ESC) {
                    token.cancel();
                    return;
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

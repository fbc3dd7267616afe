// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bounded tool-output truncation.
//!
//! Output over the per-tool byte cap keeps its head (whole lines) and gains
//! a stable marker naming the exact number of dropped lines. The marker is
//! not counted against the cap, so identical inputs always cut at identical
//! boundaries.

/// Truncate `s` to at most `cap` bytes of content, whole lines only.
pub fn truncate_output(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        return s.to_string();
    }

    let lines: Vec<&str> = s.lines().collect();
    let total = lines.len();
    let mut kept = 0usize;
    let mut size = 0usize;
    for line in &lines {
        // +1 for the newline that joins kept lines.
        let add = line.len() + usize::from(kept > 0);
        if size + add > cap {
            break;
        }
        size += add;
        kept += 1;
    }

    let dropped = total - kept;
    if dropped == 0 {
        // Byte cap exceeded only by the trailing newline; keep everything.
        return s.to_string();
    }
    let mut out = lines[..kept].join("\n");
    if kept > 0 {
        out.push('\n');
    }
    out.push_str(&format!("… ({dropped} earlier lines)"));
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

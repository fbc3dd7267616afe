// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session compaction: drop `noop` records, re-encode every survivor
//! canonically, and swap the file atomically.
//!
//! Compaction preserves the ordered sequence of non-noop events exactly —
//! a replay before and after must be semantically identical.

use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::event::{now_ms, EventData};
use crate::sidecar::{save_checkpoint, CompactCheckpoint, SIDECAR_VERSION};
use crate::store::{session_path, validate_sid, SessionError, SessionReader};

pub fn compact_session(dir: &Path, sid: &str) -> Result<CompactCheckpoint, SessionError> {
    validate_sid(sid)?;
    let path = session_path(dir, sid);
    let in_bytes = std::fs::metadata(&path)?.len();

    // Stream into a temp file in the same directory so the final rename
    // stays on one filesystem.
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let mut in_lines = 0usize;
    let mut out_lines = 0usize;
    let mut out_bytes = 0u64;

    for record in SessionReader::open(&path)? {
        let event = record?;
        in_lines += 1;
        if matches!(event.data, EventData::Noop {}) {
            continue;
        }
        let mut line = event.encode();
        line.push('\n');
        tmp.write_all(line.as_bytes())?;
        out_lines += 1;
        out_bytes += line.len() as u64;
    }

    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| SessionError::Io(e.error))?;

    let checkpoint = CompactCheckpoint {
        version: SIDECAR_VERSION,
        in_lines,
        out_lines,
        in_bytes,
        out_bytes,
        compacted_at_ms: now_ms(),
    };
    save_checkpoint(dir, sid, &checkpoint)?;
    debug!(sid, in_lines, out_lines, "session compacted");
    Ok(checkpoint)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

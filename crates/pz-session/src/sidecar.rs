// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Small JSON sidecars co-located with the session file.

use std::path::{Path, PathBuf};

use pz_model::ErrClass;
use serde::{Deserialize, Serialize};

use crate::store::SessionError;

pub const SIDECAR_VERSION: u32 = 1;

/// Persisted retry progress for a session.
///
/// Invariant: `fail_ct <= tries_done` — a failure implies a completed try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub version: u32,
    pub tries_done: u32,
    pub fail_ct: u32,
    pub next_wait_ms: u64,
    pub last_err: ErrClass,
}

impl RetryState {
    pub fn new(tries_done: u32, fail_ct: u32, next_wait_ms: u64, last_err: ErrClass) -> Self {
        Self { version: SIDECAR_VERSION, tries_done, fail_ct, next_wait_ms, last_err }
    }

    fn validate(&self) -> Result<(), SessionError> {
        if self.version != SIDECAR_VERSION {
            return Err(SessionError::UnsupportedVersion { line: 0, version: self.version });
        }
        if self.fail_ct > self.tries_done {
            return Err(SessionError::MalformedReplayLine {
                line: 0,
                cause: format!(
                    "retry state invariant violated: fail_ct {} > tries_done {}",
                    self.fail_ct, self.tries_done
                ),
            });
        }
        Ok(())
    }
}

pub fn retry_path(dir: &Path, sid: &str) -> PathBuf {
    dir.join(format!("{sid}.retry.json"))
}

pub fn save_retry(dir: &Path, sid: &str, state: &RetryState) -> Result<(), SessionError> {
    state.validate()?;
    std::fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(state).expect("retry state always serializes");
    std::fs::write(retry_path(dir, sid), json + "\n")?;
    Ok(())
}

pub fn load_retry(dir: &Path, sid: &str) -> Result<Option<RetryState>, SessionError> {
    let path = retry_path(dir, sid);
    let data = match std::fs::read_to_string(&path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let state: RetryState =
        serde_json::from_str(&data).map_err(|e| SessionError::MalformedReplayLine {
            line: 0,
            cause: format!("retry sidecar: {e}"),
        })?;
    state.validate()?;
    Ok(Some(state))
}

/// Compaction bookkeeping written next to the session after each rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactCheckpoint {
    pub version: u32,
    pub in_lines: usize,
    pub out_lines: usize,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub compacted_at_ms: i64,
}

pub fn checkpoint_path(dir: &Path, sid: &str) -> PathBuf {
    dir.join(format!("{sid}.compact.json"))
}

pub fn save_checkpoint(
    dir: &Path,
    sid: &str,
    checkpoint: &CompactCheckpoint,
) -> Result<(), SessionError> {
    let json = serde_json::to_string_pretty(checkpoint).expect("checkpoint always serializes");
    std::fs::write(checkpoint_path(dir, sid), json + "\n")?;
    Ok(())
}

pub fn load_checkpoint(dir: &Path, sid: &str) -> Result<Option<CompactCheckpoint>, SessionError> {
    let path = checkpoint_path(dir, sid);
    let data = match std::fs::read_to_string(&path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|e| SessionError::MalformedReplayLine {
            line: 0,
            cause: format!("compact sidecar: {e}"),
        })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

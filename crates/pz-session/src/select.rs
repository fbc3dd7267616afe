// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session selector: resolve a user-supplied token into a concrete
//! `(sid, dir)` plan.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::store::SessionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub sid: String,
    pub dir: PathBuf,
}

/// Resolve `token` against the session directory.
///
/// - A path ending in `.jsonl` (absolute or with separators) is honored
///   directly.
/// - `latest` picks the greatest mtime; ties go to the lexicographically
///   greatest sid.
/// - Anything else matches `<token>.jsonl` exactly, then as a prefix —
///   a unique prefix resolves, several matches are ambiguous.
pub fn resolve(token: &str, dir: &Path) -> Result<SessionPlan, SessionError> {
    if token.ends_with(".jsonl") {
        let path = PathBuf::from(token);
        let sid = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| SessionError::SessionNotFound(token.to_string()))?
            .to_string();
        let parent = match path.parent() {
            Some(p) if p.as_os_str().is_empty() => dir.to_path_buf(),
            Some(p) => p.to_path_buf(),
            None => dir.to_path_buf(),
        };
        if !path_exists(&parent, &sid) {
            return Err(SessionError::SessionNotFound(token.to_string()));
        }
        return Ok(SessionPlan { sid, dir: parent });
    }

    if token == "latest" {
        let entries = list_sessions(dir)?;
        return pick_latest(entries)
            .map(|sid| SessionPlan { sid, dir: dir.to_path_buf() })
            .ok_or_else(|| SessionError::SessionNotFound(token.to_string()));
    }

    // Exact sid first.
    if path_exists(dir, token) {
        return Ok(SessionPlan { sid: token.to_string(), dir: dir.to_path_buf() });
    }

    // Prefix match.
    let mut matches: Vec<String> = list_sessions(dir)?
        .into_iter()
        .map(|(sid, _)| sid)
        .filter(|sid| sid.starts_with(token))
        .collect();
    match matches.len() {
        0 => Err(SessionError::SessionNotFound(token.to_string())),
        1 => Ok(SessionPlan { sid: matches.remove(0), dir: dir.to_path_buf() }),
        _ => Err(SessionError::AmbiguousSession(token.to_string())),
    }
}

fn path_exists(dir: &Path, sid: &str) -> bool {
    dir.join(format!("{sid}.jsonl")).is_file()
}

fn list_sessions(dir: &Path) -> Result<Vec<(String, SystemTime)>, SessionError> {
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(sid) = name.strip_suffix(".jsonl") else { continue };
        let mtime = entry
            .metadata()?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        out.push((sid.to_string(), mtime));
    }
    Ok(out)
}

/// Greatest mtime wins; mtime ties break to the lexicographically greatest
/// sid so the result is stable across runs.
fn pick_latest(entries: Vec<(String, SystemTime)>) -> Option<String> {
    entries
        .into_iter()
        .max_by(|(a_sid, a_t), (b_sid, b_t)| a_t.cmp(b_t).then_with(|| a_sid.cmp(b_sid)))
        .map(|(sid, _)| sid)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

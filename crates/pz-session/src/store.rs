// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only writer and strict replay reader for session files.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::event::{SessionEvent, SESSION_VERSION};

/// Default per-line ceiling for replay. A line this long is a corrupt file,
/// not a conversation.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session id {0:?}: must be non-empty and contain no path separators")]
    InvalidSid(String),

    #[error("empty replay line {line}")]
    EmptyReplayLine { line: usize },

    #[error("replay line {line} exceeds {max} bytes")]
    ReplayLineTooLong { line: usize, max: usize },

    #[error("malformed replay line {line}: {cause}")]
    MalformedReplayLine { line: usize, cause: String },

    #[error("unsupported session version {version} on line {line}")]
    UnsupportedVersion { line: usize, version: u32 },

    #[error("session file of {0} bytes exceeds addressable memory")]
    FileTooLarge(u64),

    #[error("ambiguous session token {0:?}: multiple sessions match")]
    AmbiguousSession(String),

    #[error("session not found: {0:?}")]
    SessionNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Session ids become file names; reject anything that could escape the
/// session directory.
pub fn validate_sid(sid: &str) -> Result<(), SessionError> {
    if sid.is_empty() || sid.contains(['/', '\\', '\0']) {
        return Err(SessionError::InvalidSid(sid.to_string()));
    }
    Ok(())
}

pub fn session_path(dir: &Path, sid: &str) -> PathBuf {
    dir.join(format!("{sid}.jsonl"))
}

/// When appended records reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// fsync after every append.
    Always,
    /// fsync after each k-th append (k > 0).
    EveryN(u32),
}

/// Append-only writer.
///
/// Each append opens the file in create-or-append mode, writes one encoded
/// line, and closes — no long-lived per-session handle is cached, so an
/// external compaction can swap the file out between appends.
pub struct SessionWriter {
    dir: PathBuf,
    sid: String,
    policy: FlushPolicy,
    appends_since_sync: u32,
}

impl SessionWriter {
    pub fn new(
        dir: impl Into<PathBuf>,
        sid: impl Into<String>,
        policy: FlushPolicy,
    ) -> Result<Self, SessionError> {
        let sid = sid.into();
        validate_sid(&sid)?;
        if let FlushPolicy::EveryN(0) = policy {
            return Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "flush period must be positive",
            )));
        }
        Ok(Self { dir: dir.into(), sid, policy, appends_since_sync: 0 })
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn path(&self) -> PathBuf {
        session_path(&self.dir, &self.sid)
    }

    pub fn append(&mut self, event: &SessionEvent) -> Result<(), SessionError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())?;
        let mut line = event.encode();
        line.push('\n');
        file.write_all(line.as_bytes())?;

        self.appends_since_sync += 1;
        let sync_now = match self.policy {
            FlushPolicy::Always => true,
            FlushPolicy::EveryN(k) => self.appends_since_sync >= k,
        };
        if sync_now {
            file.sync_all()?;
            self.appends_since_sync = 0;
        }
        Ok(())
    }

    /// Number of records currently on disk.
    pub fn line_count(&self) -> Result<usize, SessionError> {
        line_count(&self.path())
    }
}

pub fn line_count(path: &Path) -> Result<usize, SessionError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes.iter().filter(|&&b| b == b'\n').count()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Strict replay reader.
///
/// Loads the whole file up front, then yields events line by line with
/// 1-based line numbers in every error.
pub struct SessionReader {
    content: String,
    offset: usize,
    line: usize,
    max_line_bytes: usize,
}

impl SessionReader {
    pub fn open(path: &Path) -> Result<Self, SessionError> {
        Self::open_with_limit(path, DEFAULT_MAX_LINE_BYTES)
    }

    pub fn open_with_limit(path: &Path, max_line_bytes: usize) -> Result<Self, SessionError> {
        let meta = std::fs::metadata(path)?;
        if meta.len() > usize::MAX as u64 {
            return Err(SessionError::FileTooLarge(meta.len()));
        }
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), bytes = content.len(), "session loaded for replay");
        Ok(Self { content, offset: 0, line: 0, max_line_bytes })
    }

    fn next_event(&mut self) -> Option<Result<SessionEvent, SessionError>> {
        if self.offset >= self.content.len() {
            return None;
        }
        self.line += 1;
        let rest = &self.content[self.offset..];
        let (raw, consumed) = match rest.find('\n') {
            Some(pos) => (&rest[..pos], pos + 1),
            None => (rest, rest.len()),
        };
        self.offset += consumed;

        if raw.is_empty() {
            return Some(Err(SessionError::EmptyReplayLine { line: self.line }));
        }
        if raw.len() > self.max_line_bytes {
            return Some(Err(SessionError::ReplayLineTooLong {
                line: self.line,
                max: self.max_line_bytes,
            }));
        }
        let event = match SessionEvent::decode(raw) {
            Ok(ev) => ev,
            Err(e) => {
                return Some(Err(SessionError::MalformedReplayLine {
                    line: self.line,
                    cause: e.to_string(),
                }))
            }
        };
        if event.version != SESSION_VERSION {
            return Some(Err(SessionError::UnsupportedVersion {
                line: self.line,
                version: event.version,
            }));
        }
        Some(Ok(event))
    }
}

impl Iterator for SessionReader {
    type Item = Result<SessionEvent, SessionError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventData;

    fn write_events(dir: &Path, sid: &str, events: &[EventData]) -> SessionWriter {
        let mut w = SessionWriter::new(dir, sid, FlushPolicy::Always).unwrap();
        for (i, data) in events.iter().enumerate() {
            w.append(&SessionEvent::new(i as i64, data.clone())).unwrap();
        }
        w
    }

    #[test]
    fn append_then_replay_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let events = vec![
            EventData::Prompt { text: "ship".into() },
            EventData::Text { text: "ok".into() },
            EventData::Stop { reason: pz_model::StopReason::Done },
        ];
        let w = write_events(dir.path(), "s1", &events);
        let replayed: Vec<EventData> = SessionReader::open(&w.path())
            .unwrap()
            .map(|r| r.unwrap().data)
            .collect();
        assert_eq!(replayed, events);
    }

    #[test]
    fn sid_validation_rejects_path_escapes() {
        assert!(validate_sid("ok-id_1").is_ok());
        assert!(validate_sid("").is_err());
        assert!(validate_sid("a/b").is_err());
        assert!(validate_sid("a\\b").is_err());
        assert!(validate_sid("a\0b").is_err());
    }

    #[test]
    fn writer_rejects_invalid_sid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SessionWriter::new(dir.path(), "../oops", FlushPolicy::Always),
            Err(SessionError::InvalidSid(_))
        ));
    }

    #[test]
    fn every_n_zero_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SessionWriter::new(dir.path(), "s", FlushPolicy::EveryN(0)).is_err());
    }

    #[test]
    fn every_n_policy_still_persists_all_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = SessionWriter::new(dir.path(), "s", FlushPolicy::EveryN(3)).unwrap();
        for i in 0..7 {
            w.append(&SessionEvent::new(i, EventData::Noop {})).unwrap();
        }
        assert_eq!(w.line_count().unwrap(), 7);
    }

    #[test]
    fn empty_line_is_reported_with_its_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(
            &path,
            format!("{}\n\n{}\n",
                SessionEvent::new(0, EventData::Noop {}).encode(),
                SessionEvent::new(1, EventData::Noop {}).encode()),
        )
        .unwrap();
        let results: Vec<_> = SessionReader::open(&path).unwrap().collect();
        assert!(results[0].is_ok());
        assert!(matches!(
            &results[1],
            Err(SessionError::EmptyReplayLine { line: 2 })
        ));
        assert!(results[2].is_ok(), "reader continues past the bad line");
    }

    #[test]
    fn oversized_line_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let huge = SessionEvent::new(0, EventData::Text { text: "x".repeat(64) }).encode();
        std::fs::write(&path, format!("{huge}\n")).unwrap();
        let mut r = SessionReader::open_with_limit(&path, 32).unwrap();
        assert!(matches!(
            r.next(),
            Some(Err(SessionError::ReplayLineTooLong { line: 1, max: 32 }))
        ));
    }

    #[test]
    fn malformed_json_is_reported_with_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(
            &path,
            format!("{}\nnot json\n", SessionEvent::new(0, EventData::Noop {}).encode()),
        )
        .unwrap();
        let results: Vec<_> = SessionReader::open(&path).unwrap().collect();
        assert!(matches!(
            &results[1],
            Err(SessionError::MalformedReplayLine { line: 2, .. })
        ));
    }

    #[test]
    fn version_mismatch_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(&path, "{\"version\":2,\"at_ms\":0,\"data\":{\"noop\":{}}}\n").unwrap();
        let mut r = SessionReader::open(&path).unwrap();
        assert!(matches!(
            r.next(),
            Some(Err(SessionError::UnsupportedVersion { line: 1, version: 2 }))
        ));
    }

    #[test]
    fn trailing_newline_does_not_produce_phantom_line() {
        let dir = tempfile::tempdir().unwrap();
        let w = write_events(dir.path(), "s", &[EventData::Noop {}]);
        let events: Vec<_> = SessionReader::open(&w.path()).unwrap().collect();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn unterminated_final_line_is_still_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(&path, SessionEvent::new(0, EventData::Noop {}).encode()).unwrap();
        let events: Vec<_> = SessionReader::open(&path).unwrap().collect();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_ok());
    }

    #[test]
    fn missing_file_is_io_error_and_zero_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.jsonl");
        assert!(SessionReader::open(&path).is_err());
        assert_eq!(line_count(&path).unwrap(), 0);
    }
}

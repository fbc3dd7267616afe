// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Canonical Markdown export of a session transcript.

use std::path::Path;

use crate::event::EventData;
use crate::store::{session_path, SessionError, SessionReader};

/// Tool outputs longer than this are cut with an exact-count trailer.
const TOOL_OUTPUT_CAP: usize = 2000;

pub fn export_markdown(dir: &Path, sid: &str) -> Result<String, SessionError> {
    let mut out = format!("# Session {sid}\n");
    for record in SessionReader::open(&session_path(dir, sid))? {
        let event = record?;
        match event.data {
            EventData::Noop {} => {}
            EventData::Prompt { text } => {
                out.push_str("\n## User\n\n");
                out.push_str(&text);
                out.push('\n');
            }
            EventData::Text { text } => {
                out.push_str("\n## Assistant\n\n");
                out.push_str(&text);
                out.push('\n');
            }
            EventData::Thinking { text } => {
                out.push_str("\n<details>\n<summary>Thinking</summary>\n\n");
                out.push_str(&text);
                out.push_str("\n</details>\n");
            }
            EventData::ToolCall { name, args, .. } => {
                out.push_str(&format!("\n### Tool: {name}\n\n```json\n{args}\n```\n"));
            }
            EventData::ToolResult { out: result, is_err, .. } => {
                let (kept, dropped) = truncate_bytes(&result, TOOL_OUTPUT_CAP);
                out.push_str("\n```\n");
                out.push_str(kept);
                if dropped > 0 {
                    out.push_str(&format!("… ({dropped} bytes truncated)"));
                }
                out.push_str("\n```\n");
                if is_err {
                    out.push_str("\n> Tool returned an error.\n");
                }
            }
            EventData::Usage { .. } | EventData::Stop { .. } => {}
            EventData::Err { text } => {
                out.push_str(&format!("\n> Error: {text}\n"));
            }
        }
    }
    Ok(out)
}

/// Cut `s` at the greatest char boundary within `cap` bytes; returns the
/// kept prefix and the exact number of dropped bytes.
fn truncate_bytes(s: &str, cap: usize) -> (&str, usize) {
    if s.len() <= cap {
        return (s, 0);
    }
    let mut end = cap;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    (&s[..end], s.len() - end)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SessionEvent;
    use crate::store::{FlushPolicy, SessionWriter};
    use pz_model::StopReason;

    fn seed(dir: &Path, sid: &str, events: Vec<EventData>) {
        let mut w = SessionWriter::new(dir, sid, FlushPolicy::Always).unwrap();
        for (i, data) in events.into_iter().enumerate() {
            w.append(&SessionEvent::new(i as i64, data)).unwrap();
        }
    }

    #[test]
    fn transcript_sections_render_in_order() {
        let dir = tempfile::tempdir().unwrap();
        seed(
            dir.path(),
            "demo",
            vec![
                EventData::Prompt { text: "fix the bug".into() },
                EventData::Thinking { text: "look at tests first".into() },
                EventData::ToolCall {
                    id: "t1".into(),
                    name: "grep".into(),
                    args: r#"{"pattern":"panic"}"#.into(),
                },
                EventData::ToolResult { id: "t1".into(), out: "src/lib.rs:10".into(), is_err: false },
                EventData::Text { text: "found it".into() },
                EventData::Stop { reason: StopReason::Done },
            ],
        );
        let md = export_markdown(dir.path(), "demo").unwrap();
        assert!(md.starts_with("# Session demo\n"));
        let user = md.find("## User").unwrap();
        let thinking = md.find("<summary>Thinking</summary>").unwrap();
        let tool = md.find("### Tool: grep").unwrap();
        let assistant = md.find("## Assistant").unwrap();
        assert!(user < thinking && thinking < tool && tool < assistant);
        assert!(md.contains("```json\n{\"pattern\":\"panic\"}\n```"));
        assert!(md.contains("src/lib.rs:10"));
    }

    #[test]
    fn long_tool_output_gets_exact_byte_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let long = "x".repeat(2500);
        seed(
            dir.path(),
            "big",
            vec![EventData::ToolResult { id: "t".into(), out: long, is_err: false }],
        );
        let md = export_markdown(dir.path(), "big").unwrap();
        assert!(md.contains("… (500 bytes truncated)"), "md tail: {}", &md[md.len() - 120..]);
    }

    #[test]
    fn short_tool_output_has_no_trailer() {
        let dir = tempfile::tempdir().unwrap();
        seed(
            dir.path(),
            "small",
            vec![EventData::ToolResult { id: "t".into(), out: "tiny".into(), is_err: false }],
        );
        let md = export_markdown(dir.path(), "small").unwrap();
        assert!(!md.contains("truncated"));
    }

    #[test]
    fn error_events_render_as_blockquotes() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), "err", vec![EventData::Err { text: "529 overloaded".into() }]);
        let md = export_markdown(dir.path(), "err").unwrap();
        assert!(md.contains("> Error: 529 overloaded"));
    }

    #[test]
    fn failed_tool_results_are_flagged() {
        let dir = tempfile::tempdir().unwrap();
        seed(
            dir.path(),
            "tf",
            vec![EventData::ToolResult { id: "t".into(), out: "denied".into(), is_err: true }],
        );
        let md = export_markdown(dir.path(), "tf").unwrap();
        assert!(md.contains("> Tool returned an error."));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        // Multi-byte char straddling the cap must not split.
        let s = format!("{}é", "a".repeat(1999)); // é is 2 bytes at offset 1999
        let (kept, dropped) = truncate_bytes(&s, 2000);
        assert_eq!(kept.len(), 1999);
        assert_eq!(dropped, 2);
    }
}

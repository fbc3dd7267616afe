// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The reference deterministic sink: text streams through verbatim, every
//! other event is buffered and emitted as a stable-ordered trailer at
//! `finish`. Output is byte-identical for any permutation of the same
//! multi-event input.

use std::io::Write;

use pz_model::{Ev, StopReason, Usage};

use crate::sink::ModeSink;

pub struct PrintSink<W: Write> {
    out: W,
    /// Non-verbose suppresses thinking/tool/usage/stop trailer entries;
    /// `err` lines are always emitted.
    verbose: bool,
    thinking: Vec<String>,
    tool_calls: Vec<(String, String, String)>,
    tool_results: Vec<(String, String, bool)>,
    usage: Option<Usage>,
    stop: Option<StopReason>,
    errs: Vec<String>,
}

impl<W: Write> PrintSink<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self {
            out,
            verbose,
            thinking: Vec::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            usage: None,
            stop: None,
            errs: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Keep the usage with the greatest totals: compared by
    /// `(tot_tok, out_tok, in_tok)`.
    fn merge_usage(&mut self, u: Usage) {
        let better = match &self.usage {
            None => true,
            Some(cur) => {
                (u.tot_tok, u.out_tok, u.in_tok) > (cur.tot_tok, cur.out_tok, cur.in_tok)
            }
        };
        if better {
            self.usage = Some(u);
        }
    }
}

impl<W: Write> ModeSink for PrintSink<W> {
    fn push(&mut self, ev: &Ev) {
        match ev {
            Ev::Text(t) => {
                let _ = self.out.write_all(t.as_bytes());
                let _ = self.out.flush();
            }
            Ev::Thinking(t) => self.thinking.push(t.clone()),
            Ev::ToolCall { id, name, args } => {
                self.tool_calls.push((id.clone(), name.clone(), args.clone()))
            }
            Ev::ToolResult { id, out, is_err } => {
                self.tool_results.push((id.clone(), out.clone(), *is_err))
            }
            Ev::Usage(u) => self.merge_usage(*u),
            Ev::Stop(r) => {
                self.stop = Some(match self.stop {
                    Some(cur) => cur.merge(*r),
                    None => *r,
                })
            }
            Ev::Err(msg) => self.errs.push(msg.clone()),
        }
    }

    fn finish(&mut self) {
        let mut trailer = String::new();
        if self.verbose {
            self.thinking.sort();
            for t in &self.thinking {
                trailer.push_str(&format!("thinking {}\n", quote(t)));
            }
            self.tool_calls.sort();
            for (id, name, args) in &self.tool_calls {
                trailer.push_str(&format!(
                    "tool_call {} {} {}\n",
                    quote(id),
                    quote(name),
                    quote(args)
                ));
            }
            self.tool_results.sort();
            for (id, out, is_err) in &self.tool_results {
                trailer.push_str(&format!(
                    "tool_result {} {} err={}\n",
                    quote(id),
                    quote(out),
                    is_err
                ));
            }
            if let Some(u) = &self.usage {
                trailer.push_str(&format!(
                    "usage in={} out={} total={} cache_read={} cache_write={}\n",
                    u.in_tok, u.out_tok, u.tot_tok, u.cache_read, u.cache_write
                ));
            }
            if let Some(stop) = self.stop {
                trailer.push_str(&format!("stop {}\n", stop.as_str()));
            }
        }
        self.errs.sort();
        for e in &self.errs {
            trailer.push_str(&format!("err {}\n", quote(e)));
        }
        let _ = self.out.write_all(trailer.as_bytes());
        let _ = self.out.flush();
    }
}

/// The merged stop observed by this sink, for exit-code mapping.
impl<W: Write> PrintSink<W> {
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }
}

/// C-style quoting with escapes for `"`, `\`, `\n`, `\r`, `\t` and
/// `\u00XX` for remaining control bytes.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run(events: &[Ev], verbose: bool) -> String {
        let mut sink = PrintSink::new(Vec::new(), verbose);
        for ev in events {
            sink.push(ev);
        }
        sink.finish();
        String::from_utf8(sink.into_inner()).unwrap()
    }

    fn sample_events() -> Vec<Ev> {
        vec![
            Ev::Text("streamed".into()),
            Ev::Err("z-err".into()),
            Ev::Thinking("later thought".into()),
            Ev::ToolCall { id: "t2".into(), name: "bash".into(), args: "{}".into() },
            Ev::Usage(Usage { in_tok: 1, out_tok: 1, tot_tok: 2, ..Default::default() }),
            Ev::ToolResult { id: "t2".into(), out: "ok".into(), is_err: false },
            Ev::Stop(StopReason::Done),
            Ev::ToolCall { id: "t1".into(), name: "read".into(), args: "{\"path\":\"x\"}".into() },
            Ev::Usage(Usage { in_tok: 3, out_tok: 5, tot_tok: 8, ..Default::default() }),
            Ev::Err("a-err".into()),
            Ev::Thinking("early thought".into()),
            Ev::Stop(StopReason::Tool),
        ]
    }

    #[test]
    fn formatter_emits_deterministic_canonical_output() {
        let events = sample_events();
        let forward = run(&events, true);
        let mut reversed = events.clone();
        reversed.reverse();
        let backward = run(&reversed, true);
        // Streamed text order differs between permutations, but the trailer
        // must be byte-identical; compare from the first trailer line.
        let tail = |s: &str| s[s.find("thinking ").unwrap()..].to_string();
        assert_eq!(tail(&forward), tail(&backward));
        assert!(forward.ends_with("err \"a-err\"\nerr \"z-err\"\n"), "{forward:?}");
    }

    #[test]
    fn trailer_orders_kinds_canonically() {
        let out = run(&sample_events(), true);
        let thinking = out.find("thinking ").unwrap();
        let tool_call = out.find("tool_call ").unwrap();
        let tool_result = out.find("tool_result ").unwrap();
        let usage = out.find("usage ").unwrap();
        let stop = out.find("stop ").unwrap();
        let err = out.find("err \"").unwrap();
        assert!(thinking < tool_call);
        assert!(tool_call < tool_result);
        assert!(tool_result < usage);
        assert!(usage < stop);
        assert!(stop < err);
    }

    #[test]
    fn text_streams_verbatim_before_the_trailer() {
        let out = run(&sample_events(), true);
        assert!(out.starts_with("streamed"));
    }

    #[test]
    fn single_usage_with_greatest_totals_survives() {
        let out = run(&sample_events(), true);
        assert_eq!(out.matches("usage ").count(), 1);
        assert!(out.contains("usage in=3 out=5 total=8"));
    }

    #[test]
    fn usage_ties_break_on_out_then_in() {
        let events = vec![
            Ev::Usage(Usage { in_tok: 9, out_tok: 1, tot_tok: 10, ..Default::default() }),
            Ev::Usage(Usage { in_tok: 2, out_tok: 8, tot_tok: 10, ..Default::default() }),
            Ev::Stop(StopReason::Done),
        ];
        let out = run(&events, true);
        assert!(out.contains("usage in=2 out=8 total=10"), "{out}");
    }

    #[test]
    fn stops_merge_to_the_highest_rank() {
        let out = run(&sample_events(), true);
        assert_eq!(out.matches("stop ").count(), 1);
        assert!(out.contains("stop tool\n"), "done < tool: {out}");
    }

    #[test]
    fn tool_calls_sort_by_id_name_args() {
        let out = run(&sample_events(), true);
        let first = out.find("tool_call \"t1\"").unwrap();
        let second = out.find("tool_call \"t2\"").unwrap();
        assert!(first < second);
    }

    #[test]
    fn non_verbose_suppresses_everything_but_text_and_err() {
        let out = run(&sample_events(), false);
        assert!(out.starts_with("streamed"));
        assert!(!out.contains("thinking "));
        assert!(!out.contains("tool_call "));
        assert!(!out.contains("usage "));
        assert!(!out.contains("stop "));
        assert!(out.ends_with("err \"a-err\"\nerr \"z-err\"\n"));
    }

    #[test]
    fn quoting_escapes_controls_and_specials() {
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote("a\\b"), "\"a\\\\b\"");
        assert_eq!(quote("a\nb\tc\r"), "\"a\\nb\\tc\\r\"");
        assert_eq!(quote("bell\x07"), "\"bell\\u0007\"");
    }

    #[test]
    fn stop_reason_accessor_reflects_merge() {
        let mut sink = PrintSink::new(Vec::new(), true);
        sink.push(&Ev::Stop(StopReason::Done));
        sink.push(&Ev::Stop(StopReason::Canceled));
        assert_eq!(sink.stop_reason(), Some(StopReason::Canceled));
    }
}

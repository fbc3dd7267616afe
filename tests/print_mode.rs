// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Full-stack runs through the subprocess provider: envelope → child
//! process → frame parser → agent loop → session log → exit code.

use pz_core::{Command, Mode, ProviderChoice, Runtime, SessionChoice};
use pz_model::Opts;
use pz_session::{EventData, SessionReader};
use pz_tools::ALL_TOOLS;

fn command(provider_cmd: &str, dir: &std::path::Path) -> (Command, std::path::PathBuf) {
    (
        Command {
            mode: Mode::Print,
            prompt: "hi".into(),
            model: "local".into(),
            provider: ProviderChoice::Subprocess(provider_cmd.into()),
            tool_mask: ALL_TOOLS,
            session: SessionChoice::New,
            max_turns: None,
            opts: Opts::default(),
            verbose: false,
        },
        dir.to_path_buf(),
    )
}

fn replay_only_session(dir: &std::path::Path) -> Vec<EventData> {
    let session = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|x| x == "jsonl"))
        .expect("one session file");
    SessionReader::open(&session)
        .unwrap()
        .map(|r| r.unwrap().data)
        .collect()
}

#[tokio::test]
async fn clean_subprocess_run_exits_zero_and_replays() {
    let dir = tempfile::tempdir().unwrap();
    let (cmd, session_dir) = command(
        "cat >/dev/null; printf 'text:hello\\nusage:1,2,3\\nstop:done\\n'",
        dir.path(),
    );
    let code = Runtime::new(cmd, session_dir).run().await;
    assert_eq!(code, 0);

    let events = replay_only_session(dir.path());
    assert_eq!(events[0], EventData::Prompt { text: "hi".into() });
    assert_eq!(events[1], EventData::Text { text: "hello".into() });
    assert!(matches!(events[2], EventData::Usage { in_tok: 1, out_tok: 2, tot_tok: 3, .. }));
    assert!(matches!(
        events[3],
        EventData::Stop { reason: pz_model::StopReason::Done }
    ));
}

#[tokio::test]
async fn provider_without_stop_frame_exits_19() {
    let dir = tempfile::tempdir().unwrap();
    let (cmd, session_dir) = command("cat >/dev/null; printf 'text:partial\\n'", dir.path());
    let code = Runtime::new(cmd, session_dir).run().await;
    assert_eq!(code, 19);

    let events = replay_only_session(dir.path());
    assert!(events
        .iter()
        .any(|d| matches!(d, EventData::Err { text } if text.contains("stop"))));
}

#[tokio::test]
async fn provider_err_frame_surfaces_in_session() {
    let dir = tempfile::tempdir().unwrap();
    let (cmd, session_dir) = command(
        "cat >/dev/null; printf 'err:backend overloaded\\nstop:err\\n'",
        dir.path(),
    );
    let code = Runtime::new(cmd, session_dir).run().await;
    assert_eq!(code, 19);

    let events = replay_only_session(dir.path());
    assert!(events
        .iter()
        .any(|d| matches!(d, EventData::Err { text } if text == "backend overloaded")));
}

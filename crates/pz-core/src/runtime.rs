// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Runtime lifecycle: a labeled state machine from resolved command to
//! exit code.
//!
//! `init_provider → init_store → dispatch → turn → done`. Every transition
//! is explicit so each guard can be tested in isolation, and every failure
//! path carries a `reason` (what broke) plus a `next` (what to do).

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use pz_auth::CredentialStore;
use pz_model::{
    AnthropicProvider, Backoff, GenericProvider, OpenAiProvider, Opts, Provider, RetryPolicy,
    StopReason, SubprocessTransport,
};
use pz_session::{resolve, validate_sid, FlushPolicy, SessionWriter};
use pz_tools::builtin_registry;

use crate::agent::{Agent, LoopConfig};
use crate::cancel::CancelToken;
use crate::json::JsonSink;
use crate::print::PrintSink;
use crate::sink::{Mode, ModeSink};

// ── Exit codes ───────────────────────────────────────────────────────────────

/// Provider/credential initialization failed.
pub const EXIT_PROVIDER_INIT: i32 = 10;
/// Session store failure (resolve, open, append, compact).
pub const EXIT_STORE: i32 = 11;
/// The loop failed outside the event protocol (internal error).
pub const EXIT_INTERNAL: i32 = 12;
/// The resolved command is unusable in this build (mode, tool list).
pub const EXIT_USAGE: i32 = 15;

/// Map the final stop reason onto the print-mode exit code.
pub fn stop_exit_code(reason: StopReason) -> i32 {
    match reason {
        StopReason::Done => 0,
        StopReason::MaxOut => 16,
        StopReason::Tool => 17,
        StopReason::Canceled => 18,
        StopReason::Err => 19,
    }
}

// ── Resolved command ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ProviderChoice {
    Anthropic,
    OpenAi,
    /// External provider command speaking the canonical framing protocol.
    Subprocess(String),
}

#[derive(Debug, Clone)]
pub enum SessionChoice {
    New,
    /// Token for the selector: sid, prefix, path, or `latest`.
    Token(String),
}

/// What the CLI collaborator hands the core.
#[derive(Debug, Clone)]
pub struct Command {
    pub mode: Mode,
    pub prompt: String,
    pub model: String,
    pub provider: ProviderChoice,
    pub tool_mask: u32,
    pub session: SessionChoice,
    pub max_turns: Option<u32>,
    pub opts: Opts,
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    InitProvider,
    InitStore,
    Dispatch,
    Turn,
    Done,
}

pub struct Runtime {
    cmd: Command,
    session_dir: PathBuf,
    cancel: CancelToken,
    /// Test seam: a pre-built provider skips credential resolution.
    provider_override: Option<Arc<dyn Provider>>,
}

impl Runtime {
    pub fn new(cmd: Command, session_dir: PathBuf) -> Self {
        Self { cmd, session_dir, cancel: CancelToken::new(), provider_override: None }
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider_override = Some(provider);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Drive the state machine to completion and return the exit code.
    pub async fn run(self) -> i32 {
        let mut state = LoopState::InitProvider;
        let mut provider: Option<Arc<dyn Provider>> = None;
        let mut writer: Option<SessionWriter> = None;
        let mut exit = 0;

        loop {
            debug!(?state, "runtime state");
            state = match state {
                LoopState::InitProvider => {
                    match self.init_provider() {
                        Ok(p) => {
                            provider = Some(p);
                            LoopState::InitStore
                        }
                        Err(msg) => {
                            fail(&msg, "set the credential env var or run `pz login <provider>`");
                            exit = EXIT_PROVIDER_INIT;
                            LoopState::Done
                        }
                    }
                }
                LoopState::InitStore => match self.init_store() {
                    Ok(w) => {
                        writer = Some(w);
                        LoopState::Dispatch
                    }
                    Err(msg) => {
                        fail(&msg, "check the session token and directory permissions");
                        exit = EXIT_STORE;
                        LoopState::Done
                    }
                },
                LoopState::Dispatch => match self.cmd.mode {
                    Mode::Print | Mode::Json => LoopState::Turn,
                    Mode::Tui | Mode::Rpc => {
                        fail(
                            "this output mode is handled by an external frontend",
                            "use --mode print or --mode json",
                        );
                        exit = EXIT_USAGE;
                        LoopState::Done
                    }
                },
                LoopState::Turn => {
                    let provider = provider.take().expect("set by init_provider");
                    let writer = writer.take().expect("set by init_store");
                    exit = self.run_turns(provider, writer).await;
                    LoopState::Done
                }
                LoopState::Done => return exit,
            };
        }
    }

    fn init_provider(&self) -> Result<Arc<dyn Provider>, String> {
        if let Some(p) = &self.provider_override {
            return Ok(Arc::clone(p));
        }
        let store = Arc::new(CredentialStore::new());
        match &self.cmd.provider {
            ProviderChoice::Anthropic => {
                // Fail fast on missing credentials instead of at first turn.
                store
                    .load("anthropic")
                    .map_err(|e| e.to_string())?;
                Ok(Arc::new(AnthropicProvider::new(self.cmd.model.clone(), store)))
            }
            ProviderChoice::OpenAi => {
                store.load("openai").map_err(|e| e.to_string())?;
                Ok(Arc::new(OpenAiProvider::new(self.cmd.model.clone(), store)))
            }
            ProviderChoice::Subprocess(cmd) => Ok(Arc::new(GenericProvider::new(
                "cmd",
                self.cmd.model.clone(),
                SubprocessTransport::new(cmd.clone()),
                RetryPolicy::new(3, Backoff::new(2000, 60_000, 2)),
            ))),
        }
    }

    fn init_store(&self) -> Result<SessionWriter, String> {
        let (sid, dir) = match &self.cmd.session {
            SessionChoice::New => {
                let sid = uuid::Uuid::new_v4().to_string();
                (sid, self.session_dir.clone())
            }
            SessionChoice::Token(token) => {
                let plan = resolve(token, &self.session_dir).map_err(|e| e.to_string())?;
                (plan.sid, plan.dir)
            }
        };
        validate_sid(&sid).map_err(|e| e.to_string())?;
        SessionWriter::new(dir, sid, FlushPolicy::Always).map_err(|e| e.to_string())
    }

    async fn run_turns(&self, provider: Arc<dyn Provider>, writer: SessionWriter) -> i32 {
        let session_dir = writer.path().parent().map(PathBuf::from).unwrap_or_default();
        let cfg = LoopConfig {
            model: self.cmd.model.clone(),
            opts: self.cmd.opts.clone(),
            tool_mask: self.cmd.tool_mask,
            max_turns: self.cmd.max_turns,
            ..Default::default()
        };
        let tools = Arc::new(builtin_registry(false));
        let mut agent = Agent::new(
            provider,
            tools,
            writer,
            session_dir,
            cfg,
            self.cancel.clone(),
        );

        let stdout = std::io::stdout();
        match self.cmd.mode {
            Mode::Print => {
                let mut sink = PrintSink::new(stdout.lock(), self.cmd.verbose);
                self.finish(&mut agent, &mut sink).await
            }
            Mode::Json => {
                let mut sink = JsonSink::new(stdout.lock());
                self.finish(&mut agent, &mut sink).await
            }
            Mode::Tui | Mode::Rpc => unreachable!("rejected in dispatch"),
        }
    }

    async fn finish(&self, agent: &mut Agent, sink: &mut dyn ModeSink) -> i32 {
        match agent.run_prompt(&self.cmd.prompt, sink).await {
            Ok(reason) => {
                sink.finish();
                stop_exit_code(reason)
            }
            Err(e) => {
                sink.finish();
                fail(&format!("{e:#}"), "inspect the session file; retry with --session latest");
                EXIT_STORE
            }
        }
    }
}

/// Diagnostics keep reason and next action separate, on stderr, so stdout
/// stays a clean pipeline.
fn fail(reason: &str, next: &str) {
    eprintln!("pz: {reason}");
    eprintln!("  next: {next}");
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pz_model::{Ev, ScriptedProvider};
    use pz_tools::ALL_TOOLS;

    fn command(mode: Mode, session: SessionChoice) -> Command {
        Command {
            mode,
            prompt: "hi".into(),
            model: "scripted-model".into(),
            provider: ProviderChoice::Subprocess("true".into()),
            tool_mask: ALL_TOOLS,
            session,
            max_turns: None,
            opts: Opts::default(),
            verbose: false,
        }
    }

    fn scripted_done() -> Arc<dyn Provider> {
        Arc::new(ScriptedProvider::new(vec![vec![
            Ev::Text("ok".into()),
            Ev::Stop(StopReason::Done),
        ]]))
    }

    #[test]
    fn stop_reasons_map_to_documented_exit_codes() {
        assert_eq!(stop_exit_code(StopReason::Done), 0);
        assert_eq!(stop_exit_code(StopReason::MaxOut), 16);
        assert_eq!(stop_exit_code(StopReason::Tool), 17);
        assert_eq!(stop_exit_code(StopReason::Canceled), 18);
        assert_eq!(stop_exit_code(StopReason::Err), 19);
    }

    #[tokio::test]
    async fn clean_print_run_exits_zero_and_writes_session() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Runtime::new(command(Mode::Print, SessionChoice::New), dir.path().into())
            .with_provider(scripted_done());
        assert_eq!(rt.run().await, 0);
        let sessions: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".jsonl"))
            .collect();
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_modes_exit_with_usage_code() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Runtime::new(command(Mode::Tui, SessionChoice::New), dir.path().into())
            .with_provider(scripted_done());
        assert_eq!(rt.run().await, EXIT_USAGE);

        let rt = Runtime::new(command(Mode::Rpc, SessionChoice::New), dir.path().into())
            .with_provider(scripted_done());
        assert_eq!(rt.run().await, EXIT_USAGE);
    }

    #[tokio::test]
    async fn unknown_session_token_exits_with_store_code() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Runtime::new(
            command(Mode::Print, SessionChoice::Token("missing".into())),
            dir.path().into(),
        )
        .with_provider(scripted_done());
        assert_eq!(rt.run().await, EXIT_STORE);
    }

    #[tokio::test]
    async fn canceled_run_exits_18() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Runtime::new(command(Mode::Json, SessionChoice::New), dir.path().into())
            .with_provider(scripted_done());
        rt.cancel_token().cancel();
        assert_eq!(rt.run().await, 18);
    }

    #[tokio::test]
    async fn provider_stream_error_exits_19() {
        let dir = tempfile::tempdir().unwrap();
        // Exhausted scripts make the first start() fail; the loop surfaces
        // err + stop(err).
        let provider: Arc<dyn Provider> = Arc::new(ScriptedProvider::new(vec![]));
        let rt = Runtime::new(command(Mode::Json, SessionChoice::New), dir.path().into())
            .with_provider(provider);
        assert_eq!(rt.run().await, 19);
    }

    #[tokio::test]
    async fn resume_token_resolves_through_the_selector() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc123.jsonl"), "").unwrap();
        let rt = Runtime::new(
            command(Mode::Print, SessionChoice::Token("abc".into())),
            dir.path().into(),
        )
        .with_provider(scripted_done());
        assert_eq!(rt.run().await, 0);
        // Events were appended to the resolved session, not a new one.
        let len = std::fs::metadata(dir.path().join("abc123.jsonl")).unwrap().len();
        assert!(len > 0);
    }
}

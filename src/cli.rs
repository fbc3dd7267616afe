// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use pz_core::{Command, Mode, ProviderChoice, SessionChoice};
use pz_model::{Opts, Thinking};
use pz_tools::{mask_from_names, ALL_TOOLS};

/// A terminal coding-agent harness with replayable sessions.
#[derive(Parser, Debug)]
#[command(name = "pz", version, about)]
pub struct Cli {
    /// The prompt to send to the model.
    pub prompt: Option<String>,

    /// Output mode.
    #[arg(long, value_enum, default_value = "print")]
    pub mode: ModeArg,

    /// Model identifier forwarded to the provider.
    #[arg(long, default_value = "claude-sonnet-4-5")]
    pub model: String,

    /// Provider driver.
    #[arg(long, value_enum, default_value = "anthropic")]
    pub provider: ProviderArg,

    /// External provider command (implies --provider cmd).
    ///
    /// The command receives the serialized request on stdin and must write
    /// `tag:value` frames to stdout, ending with a `stop:` line.
    #[arg(long)]
    pub provider_cmd: Option<String>,

    /// Session to use: "new", a session id or unique prefix, a path ending
    /// in .jsonl, or "latest".
    #[arg(long, default_value = "new")]
    pub session: String,

    /// Comma-separated list of enabled tools (default: all).
    #[arg(long, value_delimiter = ',')]
    pub tools: Option<Vec<String>>,

    /// Disable all tools for this run.
    #[arg(long)]
    pub no_tools: bool,

    /// Cap on provider turns per prompt.
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Extended-thinking mode.
    #[arg(long, value_enum, default_value = "off")]
    pub thinking: ThinkingArg,

    /// Thinking token budget (implies --thinking budget).
    #[arg(long)]
    pub thinking_budget: Option<u32>,

    /// Include thinking/tool/usage/stop entries in print-mode output.
    #[arg(long)]
    pub verbose: bool,

    /// Session directory override (default: ~/.pi/agent/sessions).
    #[arg(long)]
    pub session_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authorize a hosted provider via OAuth (PKCE).
    Login {
        /// "anthropic" or "openai".
        provider: String,
    },
    /// List or export stored sessions.
    Sessions {
        #[command(subcommand)]
        cmd: SessionCommands,
    },
    /// Compact a session file in place (drops noop records).
    Compact {
        /// Session id, unique prefix, path, or "latest".
        token: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// List session ids in the session directory.
    List,
    /// Render a session as Markdown on stdout.
    Export { token: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    Tui,
    Print,
    Json,
    Rpc,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderArg {
    Anthropic,
    Openai,
    /// Generic subprocess transport; requires --provider-cmd.
    Cmd,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThinkingArg {
    Off,
    Adaptive,
    Budget,
}

impl Cli {
    /// Resolve flags into the command struct the core consumes.
    pub fn resolve(&self) -> Result<Command, String> {
        let prompt = self
            .prompt
            .clone()
            .ok_or_else(|| "a prompt is required (or use a subcommand)".to_string())?;

        let tool_mask = if self.no_tools {
            0
        } else {
            match &self.tools {
                Some(names) => mask_from_names(names.iter().map(String::as_str))?,
                None => ALL_TOOLS,
            }
        };

        let provider = match (self.provider, &self.provider_cmd) {
            (_, Some(cmd)) => ProviderChoice::Subprocess(cmd.clone()),
            (ProviderArg::Cmd, None) => {
                return Err("--provider cmd requires --provider-cmd".into())
            }
            (ProviderArg::Anthropic, None) => ProviderChoice::Anthropic,
            (ProviderArg::Openai, None) => ProviderChoice::OpenAi,
        };

        let thinking = match (self.thinking, self.thinking_budget) {
            (ThinkingArg::Off, Some(_)) | (ThinkingArg::Budget, _) => Thinking::Budget,
            (ThinkingArg::Off, None) => Thinking::Off,
            (ThinkingArg::Adaptive, _) => Thinking::Adaptive,
        };

        Ok(Command {
            mode: match self.mode {
                ModeArg::Tui => Mode::Tui,
                ModeArg::Print => Mode::Print,
                ModeArg::Json => Mode::Json,
                ModeArg::Rpc => Mode::Rpc,
            },
            prompt,
            model: self.model.clone(),
            provider,
            tool_mask,
            session: if self.session == "new" {
                SessionChoice::New
            } else {
                SessionChoice::Token(self.session.clone())
            },
            max_turns: self.max_turns,
            opts: Opts {
                thinking,
                thinking_budget: self.thinking_budget,
                ..Default::default()
            },
            verbose: self.verbose,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, SessionCommands};
use pz_core::{Runtime, EXIT_PROVIDER_INIT, EXIT_STORE, EXIT_USAGE};

fn main() -> ExitCode {
    // Diagnostics go to stderr; stdout belongs to the conversation.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let code = runtime.block_on(run(cli));
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(cli: Cli) -> i32 {
    let session_dir = cli
        .session_dir
        .clone()
        .unwrap_or_else(default_session_dir);

    match &cli.command {
        Some(Commands::Login { provider }) => report(login(provider).await, EXIT_PROVIDER_INIT),
        Some(Commands::Sessions { cmd }) => match cmd {
            SessionCommands::List => report(list_sessions(&session_dir), EXIT_STORE),
            SessionCommands::Export { token } => {
                report(export_session(token, &session_dir), EXIT_STORE)
            }
        },
        Some(Commands::Compact { token }) => report(compact(token, &session_dir), EXIT_STORE),
        None => {
            let cmd = match cli.resolve() {
                Ok(cmd) => cmd,
                Err(msg) => {
                    eprintln!("pz: {msg}");
                    eprintln!("  next: see `pz --help`");
                    return EXIT_USAGE;
                }
            };
            Runtime::new(cmd, session_dir).run().await
        }
    }
}

fn default_session_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pi")
        .join("agent")
        .join("sessions")
}

fn report(result: anyhow::Result<()>, code: i32) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("pz: {e:#}");
            code
        }
    }
}

async fn login(provider: &str) -> anyhow::Result<()> {
    let spec = pz_auth::spec_for(provider)
        .with_context(|| format!("provider {provider} has no OAuth flow"))?;
    let store = pz_auth::CredentialStore::new();
    let pkce = pz_auth::generate_pkce();
    let (listener, port) = pz_auth::bind_ephemeral()?;
    let redirect = format!("http://127.0.0.1:{port}/callback");

    let url = pz_auth::authorize_url(spec, &redirect, &pkce);
    println!("Open this URL in your browser to authorize:\n\n  {url}\n");
    println!("Waiting for the browser callback on port {port}...");

    let params =
        tokio::task::spawn_blocking(move || pz_auth::wait_for_callback(&listener, "/callback"))
            .await
            .context("callback listener task failed")??;
    pz_auth::complete_login(&store, spec, &pkce, &params, &redirect).await?;
    println!("Credentials saved for {provider}.");
    Ok(())
}

fn list_sessions(dir: &PathBuf) -> anyhow::Result<()> {
    let mut sids: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|n| n.strip_suffix(".jsonl"))
                    .map(str::to_string)
            })
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e).with_context(|| format!("reading {}", dir.display())),
    };
    sids.sort();
    for sid in sids {
        println!("{sid}");
    }
    Ok(())
}

fn export_session(token: &str, dir: &PathBuf) -> anyhow::Result<()> {
    let plan = pz_session::resolve(token, dir)?;
    let markdown = pz_session::export_markdown(&plan.dir, &plan.sid)?;
    print!("{markdown}");
    Ok(())
}

fn compact(token: &str, dir: &PathBuf) -> anyhow::Result<()> {
    let plan = pz_session::resolve(token, dir)?;
    let cp = pz_session::compact_session(&plan.dir, &plan.sid)?;
    println!(
        "compacted {}: {} -> {} lines ({} -> {} bytes)",
        plan.sid, cp.in_lines, cp.out_lines, cp.in_bytes, cp.out_bytes
    );
    Ok(())
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Built-in tool that runs a shell command.
///
/// stdout and stderr share one pipe, so the combined output preserves the
/// order the child actually produced it in — build logs interleave their
/// progress and error lines the way a terminal would show them.
pub struct BashTool {
    pub timeout_secs: u64,
}

impl Default for BashTool {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return combined stdout + stderr.\n\
         'cmd' is required and can be any bash one-liner.\n\
         Prefer non-interactive commands; the subprocess has no TTY.\n\
         For large outputs (builds, test runs), pipe through `tail -200` or\n\
         `grep -E 'error:|warning:'` to keep only what matters."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "cmd": {
                    "type": "string",
                    "description": "The bash command line to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to cwd)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["cmd"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(script) = call.args.get("cmd").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'cmd' argument");
        };
        let workdir = call.args.get("workdir").and_then(|v| v.as_str());
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs);

        debug!(cmd = %script, "executing bash tool");

        // One pipe for both output streams keeps them interleaved in
        // production order.
        let (reader, writer) = match std::io::pipe() {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, format!("pipe: {e}")),
        };
        let writer2 = match writer.try_clone() {
            Ok(w) => w,
            Err(e) => return ToolOutput::err(&call.id, format!("pipe clone: {e}")),
        };

        let mut cmd = tokio::process::Command::new("/bin/bash");
        cmd.arg("-lc")
            .arg(script)
            // No fd 0: programs that probe isatty(0) skip their
            // terminal-manipulation paths.
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(writer2))
            .kill_on_drop(true);
        // Detach from the controlling terminal so the child cannot open
        // /dev/tty behind our redirects.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        if let Some(wd) = workdir {
            cmd.current_dir(wd);
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("spawn error: {e}")),
        };
        // The Stdio handles moved into the child; the parent must hold no
        // writer or the reader never sees EOF.
        drop(cmd);

        let read_task = tokio::task::spawn_blocking(move || {
            use std::io::Read;
            let mut reader = reader;
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            buf
        });

        let status =
            match tokio::time::timeout(std::time::Duration::from_secs(timeout), child.wait())
                .await
            {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => return ToolOutput::err(&call.id, format!("wait error: {e}")),
                Err(_) => {
                    let _ = child.kill().await;
                    return ToolOutput::err(&call.id, format!("timeout after {timeout}s"));
                }
            };

        let bytes = read_task.await.unwrap_or_default();
        let content = String::from_utf8_lossy(&bytes).to_string();

        let code = status.code().unwrap_or(-1);
        if code == 0 {
            let content = if content.is_empty() { "[exit 0]".to_string() } else { content };
            ToolOutput::ok(&call.id, content)
        } else if code == 1 {
            // Exit code 1 is the Unix convention for "no matches" (grep/rg)
            // and "condition false" (test); treating it as a tool failure
            // misleads the model about the command itself.
            let out = if content.is_empty() {
                "[exit 1]".to_string()
            } else {
                format!("[exit 1]\n{content}")
            };
            ToolOutput::ok(&call.id, out)
        } else {
            ToolOutput::err(&call.id, format!("[exit {code}]\n{content}"))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

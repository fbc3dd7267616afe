// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Subprocess transport: runs an external provider command and speaks the
//! canonical framing protocol over its stdio.
//!
//! The serialized request is written to the child's stdin, which is then
//! closed; stdout is drained in fixed-size chunks. Stderr is ignored — the
//! protocol lives entirely on stdout.

use std::process::Stdio;

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use crate::error::WireError;
use crate::runner::{ChunkStream, ChunkTransport};

const CHUNK_SIZE: usize = 4096;

/// Spawns `/bin/bash -lc <cmd>` per request.
pub struct SubprocessTransport {
    cmd: String,
}

impl SubprocessTransport {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

#[async_trait]
impl ChunkTransport for SubprocessTransport {
    async fn start(&self, req: &[u8]) -> Result<ChunkStream, WireError> {
        debug!(cmd = %self.cmd, "spawning provider command");
        let mut child = Command::new("/bin/bash")
            .arg("-lc")
            .arg(&self.cmd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WireError::TransportFatal(format!("spawn failed: {e}")))?;

        // Write the request and close stdin so the child sees EOF.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| WireError::TransportFatal("child stdin unavailable".into()))?;
        if let Err(e) = stdin.write_all(req).await {
            return Err(WireError::TransportRetryable(format!("wire break: {e}")));
        }
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WireError::TransportFatal("child stdout unavailable".into()))?;

        Ok(Box::pin(stream::unfold(
            ReadState::Reading { stdout, child },
            |state| async move {
                match state {
                    ReadState::Done => None,
                    ReadState::Reading { mut stdout, mut child } => {
                        let mut buf = vec![0u8; CHUNK_SIZE];
                        match stdout.read(&mut buf).await {
                            Ok(0) => {
                                // Stream ended; a non-zero exit surfaces after
                                // the data so partial replies are still parsed.
                                match child.wait().await {
                                    Ok(status) if status.success() => None,
                                    Ok(status) => Some((
                                        Err(WireError::TransportFatal(format!(
                                            "provider command exited with {status}"
                                        ))),
                                        ReadState::Done,
                                    )),
                                    Err(e) => Some((
                                        Err(WireError::TransportFatal(format!(
                                            "wait failed: {e}"
                                        ))),
                                        ReadState::Done,
                                    )),
                                }
                            }
                            Ok(n) => {
                                buf.truncate(n);
                                Some((Ok(buf), ReadState::Reading { stdout, child }))
                            }
                            Err(e) => Some((
                                Err(WireError::TransportRetryable(format!("read failed: {e}"))),
                                ReadState::Done,
                            )),
                        }
                    }
                }
            },
        )))
    }
}

enum ReadState {
    Reading { stdout: ChildStdout, child: Child },
    Done,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

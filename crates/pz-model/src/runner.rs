// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Streaming runner: composes a chunk transport, the frame parser, and the
//! retry policy into one buffered run.
//!
//! Each attempt gets a fresh parser and a fresh event buffer, so a failed
//! attempt can never leak partial events into the result of a later retry.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tracing::debug;

use crate::error::WireError;
use crate::frame::FrameParser;
use crate::retry::{Decision, RetryPolicy};
use crate::types::Ev;

/// Raw bytes from a transport, in arrival order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, WireError>> + Send>>;

/// Anything that can open a byte stream for a serialized request.
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    async fn start(&self, req: &[u8]) -> Result<ChunkStream, WireError>;
}

/// Injectable sleep so tests can record waits instead of serving them.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep_ms(&self, ms: u64);
}

/// Production sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}

/// The buffered result of a successful run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Events in FIFO order, all from the final (successful) attempt.
    pub events: Vec<Ev>,
    /// Total attempts made; starts at 1 and increases monotonically.
    pub tries: u32,
}

/// Drive `transport` until one attempt parses cleanly or the policy fails.
///
/// Parse errors are deterministic and never retried; only
/// [`WireError::TransportRetryable`] may cause another attempt.
pub async fn run_stream(
    transport: &dyn ChunkTransport,
    req: &[u8],
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<RunOutcome, WireError> {
    let mut tries: u32 = 1;
    loop {
        match attempt(transport, req).await {
            Ok(events) => return Ok(RunOutcome { events, tries }),
            Err(err) => match policy.step(&err, tries) {
                Decision::RetryAfterMs(ms) => {
                    debug!(tries, wait_ms = ms, %err, "stream attempt failed; retrying");
                    sleeper.sleep_ms(ms).await;
                    tries += 1;
                }
                Decision::Fail => return Err(err),
            },
        }
    }
}

async fn attempt(transport: &dyn ChunkTransport, req: &[u8]) -> Result<Vec<Ev>, WireError> {
    let mut stream = transport.start(req).await?;
    let mut parser = FrameParser::new();
    let mut events = Vec::new();
    while let Some(chunk) = stream.next().await {
        events.extend(parser.feed(&chunk?)?);
    }
    events.extend(parser.finish()?);
    Ok(events)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

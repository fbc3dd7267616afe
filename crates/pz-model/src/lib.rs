// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod error;
pub mod frame;
pub mod generic;
pub mod retry;
pub mod runner;
pub mod sanitize;
pub mod subprocess;
mod anthropic;
mod mock;
mod openai;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use error::{ErrClass, WireError};
pub use frame::FrameParser;
pub use generic::{encode_envelope, GenericProvider};
pub use mock::ScriptedProvider;
pub use openai::OpenAiProvider;
pub use provider::{Credential, CredentialSource, EventStream, Provider};
pub use retry::{Backoff, Decision, RetryPolicy};
pub use runner::{run_stream, ChunkStream, ChunkTransport, RunOutcome, Sleeper, TokioSleeper};
pub use subprocess::SubprocessTransport;
pub use types::*;

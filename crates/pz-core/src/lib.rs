// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod agent;
pub mod cancel;
pub mod json;
pub mod print;
pub mod runtime;
pub mod sink;

pub use agent::{Agent, LoopConfig};
pub use cancel::{watch_for_esc, CancelToken};
pub use json::JsonSink;
pub use print::PrintSink;
pub use runtime::{
    stop_exit_code, Command, LoopState, ProviderChoice, Runtime, SessionChoice,
    EXIT_INTERNAL, EXIT_PROVIDER_INIT, EXIT_STORE, EXIT_USAGE,
};
pub use sink::{Mode, ModeSink};

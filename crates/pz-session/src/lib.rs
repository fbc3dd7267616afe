// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod compact;
pub mod event;
pub mod export;
pub mod select;
pub mod sidecar;
pub mod store;

pub use compact::compact_session;
pub use event::{now_ms, EventData, SessionEvent, SESSION_VERSION};
pub use export::export_markdown;
pub use select::{resolve, SessionPlan};
pub use sidecar::{
    load_checkpoint, load_retry, save_checkpoint, save_retry, CompactCheckpoint, RetryState,
};
pub use store::{
    line_count, session_path, validate_sid, FlushPolicy, SessionError, SessionReader,
    SessionWriter, DEFAULT_MAX_LINE_BYTES,
};

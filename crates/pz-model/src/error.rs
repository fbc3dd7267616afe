// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors produced by the streaming stack.
///
/// Exactly one class is retryable: [`WireError::TransportRetryable`].
/// Parse-class errors are deterministic — feeding the same bytes again
/// produces the same failure — so retrying them is never correct.
#[derive(Debug, Error)]
pub enum WireError {
    /// Transient network failure: 5xx, 429, socket break mid-stream.
    #[error("transient transport failure: {0}")]
    TransportRetryable(String),

    /// Terminal transport failure: auth failure after refresh, closed
    /// connection, non-retryable HTTP status.
    #[error("transport failure: {0}")]
    TransportFatal(String),

    /// A frame that does not match the `tag:value` shape.
    #[error("malformed frame: {0}")]
    BadFrame(String),

    /// A well-formed frame with a tag outside the protocol set.
    #[error("unknown frame tag: {0}")]
    UnknownTag(String),

    /// Usage counters that fail unsigned-decimal parsing.
    #[error("invalid usage counters: {0}")]
    InvalidUsage(String),

    /// A stop literal outside the protocol set.
    #[error("unknown stop reason: {0}")]
    UnknownStop(String),

    /// The stream ended without a `stop` frame.
    #[error("stream ended without a stop frame")]
    MissingStop,

    /// Session record with a version this build does not speak.
    #[error("unsupported record version: {0}")]
    UnsupportedVersion(u32),

    /// Allocation failure.
    #[error("out of memory")]
    Resource,
}

impl WireError {
    /// The single retryability predicate for the whole taxonomy.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::TransportRetryable(_))
    }

    /// Short class label used by the retry-state sidecar.
    pub fn class(&self) -> ErrClass {
        match self {
            Self::TransportRetryable(_) => ErrClass::Transient,
            Self::TransportFatal(_) => ErrClass::Fatal,
            Self::BadFrame(_)
            | Self::UnknownTag(_)
            | Self::InvalidUsage(_)
            | Self::UnknownStop(_)
            | Self::MissingStop
            | Self::UnsupportedVersion(_) => ErrClass::Parse,
            Self::Resource => ErrClass::Internal,
        }
    }
}

/// Coarse error class recorded in the persisted retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrClass {
    None,
    Transient,
    Fatal,
    Parse,
    Tool,
    Internal,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

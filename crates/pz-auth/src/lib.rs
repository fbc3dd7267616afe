// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod callback;
pub mod oauth;
pub mod pkce;
mod error;
mod store;

pub use callback::{bind_ephemeral, wait_for_callback, CallbackParams};
pub use error::AuthError;
pub use oauth::{
    authorize_url, complete_login, spec_for, OauthSpec, ANTHROPIC_OAUTH, OPENAI_OAUTH,
};
pub use pkce::{generate as generate_pkce, PkceChallenge};
pub use store::{CredentialStore, StoredCredential};

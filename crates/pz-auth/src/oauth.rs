// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! PKCE authorization-code flows for the hosted providers.
//!
//! Each provider pins its own authorize/token endpoints, client id, scopes,
//! and extra authorize parameters. The exchange body differs per provider:
//! Anthropic takes JSON (including the `state` field), OpenAI takes a form
//! body without state.

use async_trait::async_trait;
use pz_model::{Credential, CredentialSource};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::callback::CallbackParams;
use crate::error::AuthError;
use crate::pkce::PkceChallenge;
use crate::store::{CredentialStore, StoredCredential};

/// Refresh this long before the reported expiry to absorb clock skew.
const EXPIRY_SKEW_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenBodyStyle {
    /// JSON body carrying the PKCE `state` field (Anthropic).
    JsonWithState,
    /// Form-encoded body without state (OpenAI).
    Form,
}

pub struct OauthSpec {
    pub provider: &'static str,
    pub client_id: &'static str,
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub scopes: &'static str,
    pub extra_params: &'static [(&'static str, &'static str)],
    pub token_body: TokenBodyStyle,
}

pub const ANTHROPIC_OAUTH: OauthSpec = OauthSpec {
    provider: "anthropic",
    client_id: "9d1c250a-e61b-44d9-88ed-5944d1962f5e",
    authorize_url: "https://claude.ai/oauth/authorize",
    token_url: "https://console.anthropic.com/v1/oauth/token",
    scopes: "org:create_api_key user:profile user:inference",
    extra_params: &[("code", "true")],
    token_body: TokenBodyStyle::JsonWithState,
};

pub const OPENAI_OAUTH: OauthSpec = OauthSpec {
    provider: "openai",
    client_id: "app_EMoamEEZ73f0CkXaXp7hrann",
    authorize_url: "https://auth.openai.com/oauth/authorize",
    token_url: "https://auth.openai.com/oauth/token",
    scopes: "openid profile email offline_access",
    extra_params: &[
        ("id_token_add_organizations", "true"),
        ("codex_cli_simplified_flow", "true"),
    ],
    token_body: TokenBodyStyle::Form,
};

pub fn spec_for(provider: &str) -> Option<&'static OauthSpec> {
    match provider {
        "anthropic" => Some(&ANTHROPIC_OAUTH),
        "openai" => Some(&OPENAI_OAUTH),
        _ => None,
    }
}

/// Build the browser authorization URL for one login attempt.
///
/// The PKCE verifier doubles as the `state` parameter so the callback can
/// be tied back to this attempt without extra bookkeeping.
pub fn authorize_url(spec: &OauthSpec, redirect_uri: &str, pkce: &PkceChallenge) -> String {
    let mut url = Url::parse(spec.authorize_url).expect("static authorize URL is valid");
    {
        let mut q = url.query_pairs_mut();
        q.append_pair("response_type", "code");
        q.append_pair("client_id", spec.client_id);
        q.append_pair("redirect_uri", redirect_uri);
        q.append_pair("scope", spec.scopes);
        q.append_pair("code_challenge", &pkce.challenge);
        q.append_pair("code_challenge_method", "S256");
        q.append_pair("state", &pkce.verifier);
        for (k, v) in spec.extra_params {
            q.append_pair(k, v);
        }
    }
    url.to_string()
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: i64,
}

impl TokenResponse {
    fn into_stored(self) -> StoredCredential {
        StoredCredential::Oauth {
            access: self.access_token,
            refresh: self.refresh_token,
            expires: now_ms() + self.expires_in * 1000 - EXPIRY_SKEW_MS,
        }
    }
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    spec: &OauthSpec,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
) -> Result<StoredCredential, AuthError> {
    let client = reqwest::Client::new();
    let resp = match spec.token_body {
        TokenBodyStyle::JsonWithState => client
            .post(spec.token_url)
            .json(&serde_json::json!({
                "grant_type": "authorization_code",
                "code": code,
                "state": verifier,
                "client_id": spec.client_id,
                "redirect_uri": redirect_uri,
                "code_verifier": verifier,
            }))
            .send()
            .await,
        TokenBodyStyle::Form => client
            .post(spec.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", spec.client_id),
                ("redirect_uri", redirect_uri),
                ("code_verifier", verifier),
            ])
            .send()
            .await,
    }
    .map_err(|e| AuthError::TokenExchange(format!("{}: {e}", spec.provider)))?;

    parse_token_response(spec, resp).await
}

/// Refresh an access token with `grant_type=refresh_token`.
pub async fn refresh_tokens(
    spec: &OauthSpec,
    refresh_token: &str,
) -> Result<StoredCredential, AuthError> {
    let client = reqwest::Client::new();
    let resp = match spec.token_body {
        TokenBodyStyle::JsonWithState => client
            .post(spec.token_url)
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "client_id": spec.client_id,
            }))
            .send()
            .await,
        TokenBodyStyle::Form => client
            .post(spec.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", spec.client_id),
            ])
            .send()
            .await,
    }
    .map_err(|e| AuthError::TokenExchange(format!("{}: {e}", spec.provider)))?;

    parse_token_response(spec, resp).await
}

async fn parse_token_response(
    spec: &OauthSpec,
    resp: reqwest::Response,
) -> Result<StoredCredential, AuthError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AuthError::TokenExchange(format!(
            "{} token endpoint returned {status}: {body}",
            spec.provider
        )));
    }
    let tokens: TokenResponse = resp
        .json()
        .await
        .map_err(|e| AuthError::TokenExchange(format!("malformed token response: {e}")))?;
    Ok(tokens.into_stored())
}

/// Validate the callback against this attempt and persist the credential.
///
/// A state mismatch aborts before any network call — nothing is written.
pub async fn complete_login(
    store: &CredentialStore,
    spec: &OauthSpec,
    pkce: &PkceChallenge,
    params: &CallbackParams,
    redirect_uri: &str,
) -> Result<(), AuthError> {
    if params.state != pkce.verifier {
        return Err(AuthError::StateMismatch);
    }
    let stored = exchange_code(spec, &params.code, &pkce.verifier, redirect_uri).await?;
    store.save(spec.provider, stored)?;
    Ok(())
}

// ─── CredentialSource for the file store ──────────────────────────────────────

#[async_trait]
impl CredentialSource for CredentialStore {
    async fn credential(&self, provider: &str) -> anyhow::Result<Credential> {
        Ok(self.load(provider)?)
    }

    async fn refresh(&self, provider: &str) -> anyhow::Result<Credential> {
        let spec = spec_for(provider)
            .ok_or_else(|| anyhow::anyhow!("provider {provider} has no OAuth flow"))?;
        let refresh = match self.read_entry(provider)? {
            Some(StoredCredential::Oauth { refresh, .. }) if !refresh.is_empty() => refresh,
            _ => anyhow::bail!("no refresh token stored for {provider}"),
        };
        match refresh_tokens(spec, &refresh).await {
            Ok(stored) => {
                self.save(provider, stored.clone())?;
                debug!(provider, "token refreshed");
                Ok(stored.into())
            }
            Err(e) => {
                // Another process may have refreshed concurrently and rotated
                // the refresh token out from under us; accept an unexpired
                // disk copy before giving up.
                if let Some(stored @ StoredCredential::Oauth { .. }) = self.read_entry(provider)? {
                    if let StoredCredential::Oauth { expires, .. } = &stored {
                        if *expires > now_ms() {
                            warn!(provider, "refresh failed but disk copy is current; using it");
                            return Ok(stored.into());
                        }
                    }
                }
                Err(e.into())
            }
        }
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

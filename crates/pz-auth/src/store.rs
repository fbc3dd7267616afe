// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! File-backed credential store with environment overrides.
//!
//! Search order: `$HOME/.pi/agent/auth.json`, then `$HOME/.agents/auth.json`.
//! Writes always go to the former. Environment variables override the file:
//! `ANTHROPIC_OAUTH_TOKEN` (preferred), `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pz_model::Credential;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuthError;

/// One entry in the auth file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoredCredential {
    ApiKey { key: String },
    Oauth { access: String, refresh: String, expires: i64 },
}

impl From<StoredCredential> for Credential {
    fn from(s: StoredCredential) -> Self {
        match s {
            StoredCredential::ApiKey { key } => Credential::ApiKey(key),
            StoredCredential::Oauth { access, refresh, expires } => {
                Credential::OAuth { access, refresh, expires_ms: expires }
            }
        }
    }
}

/// BTreeMap keeps the serialized file stable across rewrites.
type AuthFile = BTreeMap<String, StoredCredential>;

#[derive(Debug, Clone)]
pub struct CredentialStore {
    home: PathBuf,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self { home: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")) }
    }

    /// Store rooted at an explicit home directory (tests).
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    fn search_paths(&self) -> [PathBuf; 2] {
        [
            self.home.join(".pi").join("agent").join("auth.json"),
            self.home.join(".agents").join("auth.json"),
        ]
    }

    pub fn write_path(&self) -> PathBuf {
        self.home.join(".pi").join("agent").join("auth.json")
    }

    /// Resolve the credential for `provider`, env overrides first.
    pub fn load(&self, provider: &str) -> Result<Credential, AuthError> {
        self.load_with_env(provider, &|name| std::env::var(name).ok())
    }

    /// Same as [`load`] with an injectable environment (deterministic tests).
    pub fn load_with_env(
        &self,
        provider: &str,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Credential, AuthError> {
        if let Some(cred) = env_override(provider, env) {
            return Ok(cred);
        }
        if let Some(stored) = self.read_entry(provider)? {
            return Ok(stored.into());
        }
        Err(AuthError::MissingCredential {
            provider: provider.to_string(),
            env_hint: env_hint(provider),
        })
    }

    /// Read the stored (file-only) entry for `provider`.
    pub fn read_entry(&self, provider: &str) -> Result<Option<StoredCredential>, AuthError> {
        for path in self.search_paths() {
            if let Some(file) = read_auth_file(&path)? {
                if let Some(entry) = file.get(provider) {
                    debug!(path = %path.display(), provider, "credential loaded");
                    return Ok(Some(entry.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Upsert the entry for `provider` into the canonical auth file.
    pub fn save(&self, provider: &str, cred: StoredCredential) -> Result<(), AuthError> {
        let path = self.write_path();
        let mut file = read_auth_file(&path)?.unwrap_or_default();
        file.insert(provider.to_string(), cred);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(&path, json + "\n")?;
        debug!(path = %path.display(), provider, "credential saved");
        Ok(())
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read_auth_file(path: &Path) -> Result<Option<AuthFile>, AuthError> {
    match std::fs::read_to_string(path) {
        Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn env_override(provider: &str, env: &dyn Fn(&str) -> Option<String>) -> Option<Credential> {
    match provider {
        "anthropic" => {
            if let Some(token) = env("ANTHROPIC_OAUTH_TOKEN").filter(|t| !t.is_empty()) {
                // Env-supplied tokens carry no refresh path and never expire
                // from our point of view.
                return Some(Credential::OAuth {
                    access: token,
                    refresh: String::new(),
                    expires_ms: i64::MAX,
                });
            }
            env("ANTHROPIC_API_KEY")
                .filter(|k| !k.is_empty())
                .map(Credential::ApiKey)
        }
        "openai" => env("OPENAI_API_KEY")
            .filter(|k| !k.is_empty())
            .map(Credential::ApiKey),
        _ => None,
    }
}

fn env_hint(provider: &str) -> String {
    match provider {
        "anthropic" => "ANTHROPIC_API_KEY or ANTHROPIC_OAUTH_TOKEN".into(),
        "openai" => "OPENAI_API_KEY".into(),
        other => format!("credentials for {other} in the auth file"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

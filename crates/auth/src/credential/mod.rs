// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stored OAuth credentials and their encrypted on-disk form.

pub mod cipher;
pub mod store;

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::oauth::TokenResponse;

pub use store::CredentialStore;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Current wall-clock time as epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// The persisted credential set for one user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry as epoch seconds.
    pub expires_at: u64,
    /// Scopes the provider actually granted.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_owned()
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("token_type", &self.token_type)
            .finish()
    }
}

impl CredentialRecord {
    /// Build a record from a code-exchange response.
    ///
    /// When the response carries no `scope`, the requested scopes are assumed
    /// granted.
    pub fn from_token_response(
        resp: TokenResponse,
        requested: &BTreeSet<String>,
        now: u64,
    ) -> Self {
        let scopes = match resp.scope.as_deref() {
            Some(granted) if !granted.trim().is_empty() => parse_scopes(granted),
            _ => requested.clone(),
        };
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.filter(|t| !t.is_empty()),
            expires_at: expiry(now, resp.expires_in),
            scopes,
            token_type: resp.token_type.unwrap_or_else(default_token_type),
        }
    }

    /// Apply a refresh-grant response. The refresh token is kept unless the
    /// provider rotated it; granted scopes are kept unless the provider
    /// reports a new set.
    pub fn apply_refresh(&mut self, resp: TokenResponse, now: u64) {
        self.access_token = resp.access_token;
        if let Some(rotated) = resp.refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = Some(rotated);
        }
        self.expires_at = expiry(now, resp.expires_in);
        if let Some(granted) = resp.scope.as_deref().filter(|s| !s.trim().is_empty()) {
            self.scopes = parse_scopes(granted);
        }
        if let Some(token_type) = resp.token_type {
            self.token_type = token_type;
        }
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Whether the access token is still good for at least `margin`.
    pub fn is_fresh_at(&self, now: u64, margin: Duration) -> bool {
        now.saturating_add(margin.as_secs()) < self.expires_at
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Required scopes this record was not granted.
    pub fn missing_scopes(&self, required: &BTreeSet<String>) -> BTreeSet<String> {
        required.difference(&self.scopes).cloned().collect()
    }

    pub fn seconds_remaining(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    pub fn access_token(&self) -> AccessToken {
        AccessToken {
            secret: self.access_token.clone(),
            token_type: self.token_type.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Absolute expiry for a provider-reported lifetime. Saturates, since
/// `expires_in` is untrusted input.
fn expiry(now: u64, expires_in: Option<u64>) -> u64 {
    now.saturating_add(expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS))
}

/// Split a space-delimited OAuth scope string.
pub fn parse_scopes(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_owned).collect()
}

/// An access token handed to API callers. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    token_type: String,
    expires_at: u64,
}

impl AccessToken {
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Value for an HTTP `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.secret)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

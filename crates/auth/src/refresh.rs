// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Steady-state credential validation and transparent refresh.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::AuthConfig;
use crate::credential::{epoch_secs, AccessToken, CredentialStore};
use crate::error::AuthError;
use crate::oauth::{TokenClient, TokenEndpointError, TokenResponse};

/// Initial backoff between transient refresh failures.
const INITIAL_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound on the backoff.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(8);

/// When to refresh and how hard to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refresh once less than this much lifetime remains.
    pub margin: Duration,
    /// Extra attempts after the first transient failure.
    pub retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            margin: Duration::from_secs(60),
            retries: 2,
            initial_backoff: INITIAL_RETRY_BACKOFF,
            max_backoff: MAX_RETRY_BACKOFF,
        }
    }
}

impl RefreshPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            margin: config.refresh_margin(),
            retries: config.refresh_retries,
            ..Self::default()
        }
    }
}

/// Run the refresh grant, retrying transient failures with exponential
/// backoff. Terminal failures return at once.
pub async fn refresh_with_retries(
    tokens: &TokenClient,
    refresh_token: &str,
    policy: &RefreshPolicy,
) -> Result<TokenResponse, TokenEndpointError> {
    let mut backoff = policy.initial_backoff;

    for attempt in 0..=policy.retries {
        match tokens.refresh(refresh_token).await {
            Ok(resp) => return Ok(resp),
            Err(e @ TokenEndpointError::Terminal { .. }) => return Err(e),
            Err(e) if attempt == policy.retries => return Err(e),
            Err(e) => {
                debug!(attempt, err = %e, "refresh attempt failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
        }
    }

    Err(TokenEndpointError::Transient("refresh exhausted all retries".into()))
}

/// Return an access token good for at least `policy.margin`, refreshing it
/// when needed. The store lock is held for the whole call, so concurrent
/// callers never refresh the same grant twice.
///
/// A grant the provider rejects clears the store and returns
/// [`AuthError::RefreshRevoked`].
pub async fn valid_credential(
    store: &Mutex<CredentialStore>,
    tokens: &TokenClient,
    required: &BTreeSet<String>,
    policy: &RefreshPolicy,
) -> Result<AccessToken, AuthError> {
    let store = store.lock().await;
    let Some(mut record) = store.load() else {
        return Err(AuthError::AuthRequired);
    };

    let missing = record.missing_scopes(required);
    if !missing.is_empty() {
        warn!(missing = ?missing, "stored credentials lack required scopes, discarding");
        store.clear()?;
        return Err(AuthError::AuthRequired);
    }

    let now = epoch_secs();
    if record.is_fresh_at(now, policy.margin) {
        return Ok(record.access_token());
    }

    let Some(refresh_token) = record.refresh_token.clone() else {
        if record.is_expired_at(now) {
            info!("access token expired and no refresh token is stored, discarding");
            store.clear()?;
            return Err(AuthError::AuthRequired);
        }
        // Still usable until expiry; nothing to refresh with.
        return Ok(record.access_token());
    };

    match refresh_with_retries(tokens, &refresh_token, policy).await {
        Ok(resp) => {
            record.apply_refresh(resp, epoch_secs());
            store.save(&record)?;
            info!(expires_in = record.seconds_remaining(epoch_secs()), "access token refreshed");
            Ok(record.access_token())
        }
        Err(e @ TokenEndpointError::Terminal { .. }) => {
            let revoked = AuthError::RefreshRevoked(e.to_string());
            error!(err = %revoked, "refresh grant rejected, clearing stored credentials");
            store.clear()?;
            Err(revoked)
        }
        Err(TokenEndpointError::Transient(msg)) => {
            warn!(err = %msg, "refresh failed, keeping stored credentials");
            Err(AuthError::RefreshTransient(msg))
        }
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The consumer-facing authentication session.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::credential::{epoch_secs, AccessToken, CredentialRecord, CredentialStore};
use crate::error::AuthError;
use crate::flow::{BrowserPresenter, FlowController, PendingAttempt, Presenter};
use crate::oauth::TokenClient;
use crate::refresh::{self, RefreshPolicy};
use crate::status::AuthStatus;

/// Owns everything one user's authentication needs: the store and its lock,
/// the token endpoint client, and the view of any running flow.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct AuthSession {
    config: AuthConfig,
    store: tokio::sync::Mutex<CredentialStore>,
    tokens: TokenClient,
    presenter: Arc<dyn Presenter>,
    policy: RefreshPolicy,
    /// Held for the duration of a flow; `try_lock` failure means `InProgress`.
    flow_lock: tokio::sync::Mutex<()>,
    pending: Mutex<Option<PendingAttempt>>,
    last_error: Mutex<Option<String>>,
    cancel: Mutex<CancellationToken>,
}

impl AuthSession {
    /// Build a session that presents consent URLs through `presenter`.
    pub fn new(config: AuthConfig, presenter: Arc<dyn Presenter>) -> Result<Self, AuthError> {
        config.validate().map_err(|e| AuthError::Config(e.to_string()))?;
        let key = config
            .encryption_key
            .as_deref()
            .ok_or_else(|| AuthError::Config("encryption key is required".into()))?;
        let store = CredentialStore::open(config.credential_path(), key)?;
        let tokens =
            TokenClient::new(config.endpoints(), config.client_credentials(), config.http_timeout())?;
        let policy = RefreshPolicy::from_config(&config);
        Ok(Self {
            config,
            store: tokio::sync::Mutex::new(store),
            tokens,
            presenter,
            policy,
            flow_lock: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            last_error: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// Build a session that prints the consent URL and opens the system
    /// browser unless `--no-browser` was given.
    pub fn from_config(config: AuthConfig) -> Result<Self, AuthError> {
        let presenter = BrowserPresenter { open_browser: !config.no_browser };
        Self::new(config, Arc::new(presenter))
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// A currently valid access token, refreshed if it is close to expiry.
    /// Never starts an interactive flow.
    ///
    /// A revoked grant surfaces as [`AuthError::AuthRequired`].
    pub async fn valid_credential(&self) -> Result<AccessToken, AuthError> {
        let required = self.config.required_scopes();
        match refresh::valid_credential(&self.store, &self.tokens, &required, &self.policy).await {
            Err(AuthError::RefreshRevoked(_)) => {
                // The grant is gone; an older flow error no longer describes the session.
                *self.last_error.lock() = None;
                Err(AuthError::AuthRequired)
            }
            other => other,
        }
    }

    /// Like [`valid_credential`](Self::valid_credential), but runs the
    /// interactive flow when no usable credential exists.
    pub async fn valid_credential_or_login(&self) -> Result<AccessToken, AuthError> {
        match self.valid_credential().await {
            Err(AuthError::AuthRequired) => {
                info!("no usable credentials, starting interactive login");
                Ok(self.login().await?.access_token())
            }
            other => other,
        }
    }

    /// Run the interactive flow with the configured attempt budget.
    pub async fn login(&self) -> Result<CredentialRecord, AuthError> {
        self.authenticate(self.config.max_attempts, self.config.auth_timeout()).await
    }

    /// Run the interactive flow. Only one flow runs per session at a time.
    pub async fn authenticate(
        &self,
        max_attempts: u32,
        timeout: Duration,
    ) -> Result<CredentialRecord, AuthError> {
        let Ok(_guard) = self.flow_lock.try_lock() else {
            return Err(AuthError::InProgress);
        };
        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        let mut flow = FlowController::new(
            &self.config,
            &self.tokens,
            &self.store,
            self.presenter.as_ref(),
            &self.pending,
            cancel,
        );
        let result = flow.authenticate(max_attempts, timeout).await;
        *self.last_error.lock() = result.as_ref().err().map(ToString::to_string);
        result
    }

    /// Resolve the running attempt, if any, as cancelled. No further
    /// attempts are made.
    pub fn cancel_authentication(&self) {
        self.cancel.lock().cancel();
    }

    /// Revoke the stored grant at the provider (best effort) and delete the
    /// local credentials.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let store = self.store.lock().await;
        if let Some(record) = store.load() {
            let token = record.refresh_token.as_deref().unwrap_or(&record.access_token);
            match self.tokens.revoke(token).await {
                Ok(()) => info!("token revoked at provider"),
                Err(e) => warn!(err = %e, "token revocation failed, clearing local credentials anyway"),
            }
        }
        store.clear()?;
        *self.last_error.lock() = None;
        info!(path = %store.path().display(), "credentials cleared");
        Ok(())
    }

    /// Current status for display. Makes no network calls itself, but reads
    /// the store under its lock, so it waits for an in-flight refresh (at most
    /// `refresh_retries + 1` token requests plus backoff) to finish.
    pub async fn status(&self) -> AuthStatus {
        let pending = self.pending.lock().clone();
        let record = self.store.lock().await.load();
        let last_error = self.last_error.lock().clone();
        AuthStatus::derive(pending.as_ref(), record.as_ref(), last_error.as_deref(), epoch_secs())
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive authorization-code flow with a bounded number of attempts.

use std::collections::BTreeSet;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::callback::{CallbackFailure, CallbackListener, CallbackOutcome, WaitOutcome};
use crate::config::{AuthConfig, RedirectPolicy, RedirectTarget};
use crate::credential::{epoch_secs, CredentialRecord, CredentialStore};
use crate::error::AuthError;
use crate::oauth::authorize::{build_with_state, generate_code_verifier, generate_state};
use crate::oauth::TokenClient;

/// Shows the consent URL to the user.
pub trait Presenter: Send + Sync {
    fn present(&self, attempt: &AuthAttempt, url: &str);
}

/// Prints the URL to stderr and, unless disabled, opens the system browser.
#[derive(Debug, Clone, Copy)]
pub struct BrowserPresenter {
    pub open_browser: bool,
}

impl Presenter for BrowserPresenter {
    fn present(&self, attempt: &AuthAttempt, url: &str) {
        eprintln!(
            "Open this URL to authorize mailcal (attempt {}, listening on port {}):\n\n  {url}\n",
            attempt.number, attempt.listener_port
        );
        if self.open_browser {
            if let Err(e) = open::that_detached(url) {
                warn!(err = %e, "could not launch a browser, open the URL manually");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Denied(String),
    Provider(String),
    ExchangeFailed(String),
    Storage(String),
    ListenerStopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Pending,
    Succeeded,
    Failed(FailureReason),
    TimedOut,
    Cancelled,
}

/// One try at obtaining consent.
#[derive(Debug, Clone)]
pub struct AuthAttempt {
    pub number: u32,
    /// Random id for correlating log lines.
    pub id: String,
    pub state_token: String,
    pub listener_port: u16,
    pub deadline: Instant,
    pub result: AttemptResult,
}

/// What `status` shows while a flow is waiting for the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttempt {
    pub number: u32,
    pub port: u16,
    pub deadline_epoch: u64,
}

enum AttemptEnd {
    Success(CredentialRecord),
    /// Worth another attempt; carries the error to surface if none remain.
    Retry(AuthError),
    Abort(AuthError),
}

/// Runs one `authenticate` call. Built fresh per call by the session.
pub struct FlowController<'a> {
    config: &'a AuthConfig,
    tokens: &'a TokenClient,
    store: &'a tokio::sync::Mutex<CredentialStore>,
    presenter: &'a dyn Presenter,
    pending: &'a Mutex<Option<PendingAttempt>>,
    cancel: CancellationToken,
    attempts: Vec<AuthAttempt>,
}

impl<'a> FlowController<'a> {
    pub fn new(
        config: &'a AuthConfig,
        tokens: &'a TokenClient,
        store: &'a tokio::sync::Mutex<CredentialStore>,
        presenter: &'a dyn Presenter,
        pending: &'a Mutex<Option<PendingAttempt>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { config, tokens, store, presenter, pending, cancel, attempts: Vec::new() }
    }

    /// Attempts made so far, in order.
    pub fn attempts(&self) -> &[AuthAttempt] {
        &self.attempts
    }

    /// Obtain consent and exchange the code, trying up to `max_attempts`
    /// times with `timeout` per attempt. Bind and redirect problems end the
    /// flow at once without using up an attempt.
    pub async fn authenticate(
        &mut self,
        max_attempts: u32,
        timeout: Duration,
    ) -> Result<CredentialRecord, AuthError> {
        let target =
            self.config.redirect_target().map_err(|e| AuthError::Config(e.to_string()))?;
        let required = self.config.required_scopes();
        let mut last = AuthError::TimedOut(timeout);

        for number in 1..=max_attempts.max(1) {
            let end = self.run_attempt(number, &target, &required, timeout).await;
            *self.pending.lock() = None;
            match end {
                AttemptEnd::Success(record) => {
                    info!(attempt = number, "authentication succeeded");
                    return Ok(record);
                }
                AttemptEnd::Abort(err) => return Err(err),
                AttemptEnd::Retry(err) => {
                    warn!(attempt = number, max = max_attempts, err = %err, "authentication attempt failed");
                    last = err;
                }
            }
        }

        Err(match last {
            AuthError::ExchangeFailed(msg) => AuthError::Unreachable(msg),
            other => other,
        })
    }

    async fn run_attempt(
        &mut self,
        number: u32,
        target: &RedirectTarget,
        required: &BTreeSet<String>,
        timeout: Duration,
    ) -> AttemptEnd {
        let state = generate_state();
        let verifier = (!self.config.no_pkce).then(generate_code_verifier);

        let mut listener = match CallbackListener::start(
            &target.host,
            target.port,
            self.config.port_attempts,
            &target.path,
            state.clone(),
        )
        .await
        {
            Ok(l) => l,
            Err(e) => return AttemptEnd::Abort(e),
        };
        let port = listener.port();

        let redirect_uri = if port == target.port {
            target.uri.clone()
        } else if target.port == 0 {
            // Port 0 asks for any free loopback port.
            target.with_port(port)
        } else {
            let suggested = target.with_port(port);
            match self.config.redirect_policy {
                RedirectPolicy::Strict => {
                    listener.close().await;
                    return AttemptEnd::Abort(AuthError::RedirectMismatch {
                        configured: target.uri.clone(),
                        bound_port: port,
                        suggested,
                    });
                }
                RedirectPolicy::FollowBoundPort => {
                    warn!(
                        configured = %target.uri,
                        redirect_uri = %suggested,
                        "using fallback port; it must be registered with the provider"
                    );
                    suggested
                }
            }
        };

        let request = match build_with_state(
            self.tokens.endpoints(),
            self.tokens.client_id(),
            required,
            &redirect_uri,
            state,
            verifier,
        ) {
            Ok(r) => r,
            Err(e) => {
                listener.close().await;
                return AttemptEnd::Abort(e);
            }
        };

        let deadline = Instant::now() + timeout;
        let attempt = AuthAttempt {
            number,
            id: uuid::Uuid::new_v4().to_string(),
            state_token: request.state.clone(),
            listener_port: port,
            deadline,
            result: AttemptResult::Pending,
        };
        info!(attempt = number, id = %attempt.id, port, "waiting for authorization callback");
        *self.pending.lock() = Some(PendingAttempt {
            number,
            port,
            deadline_epoch: epoch_secs() + timeout.as_secs(),
        });
        self.presenter.present(&attempt, &request.url);
        self.attempts.push(attempt);

        let outcome = listener.wait(deadline, &self.cancel).await;
        listener.close().await;

        let (result, end) = match outcome {
            WaitOutcome::Callback(CallbackOutcome::Completed { code }) => {
                self.exchange(&code, &request.redirect_uri, request.pkce_verifier.as_deref(), required)
                    .await
            }
            WaitOutcome::Callback(CallbackOutcome::Failed(CallbackFailure::Denied(reason))) => (
                AttemptResult::Failed(FailureReason::Denied(reason.clone())),
                AttemptEnd::Retry(AuthError::Denied(reason)),
            ),
            WaitOutcome::Callback(CallbackOutcome::Failed(CallbackFailure::Provider {
                error,
                description,
            })) => {
                let reason = match description {
                    Some(d) => format!("{error}: {d}"),
                    None => error,
                };
                (
                    AttemptResult::Failed(FailureReason::Provider(reason.clone())),
                    AttemptEnd::Retry(AuthError::Provider(reason)),
                )
            }
            WaitOutcome::TimedOut => (AttemptResult::TimedOut, AttemptEnd::Retry(AuthError::TimedOut(timeout))),
            WaitOutcome::Cancelled => (AttemptResult::Cancelled, AttemptEnd::Abort(AuthError::Cancelled)),
            WaitOutcome::Stopped => (
                AttemptResult::Failed(FailureReason::ListenerStopped),
                AttemptEnd::Retry(AuthError::Unreachable("callback listener stopped".into())),
            ),
        };
        if let Some(last) = self.attempts.last_mut() {
            last.result = result;
        }
        end
    }

    async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: Option<&str>,
        required: &BTreeSet<String>,
    ) -> (AttemptResult, AttemptEnd) {
        let resp = match self.tokens.exchange_code(code, redirect_uri, verifier).await {
            Ok(r) => r,
            Err(e) => {
                let msg = e.to_string();
                return (
                    AttemptResult::Failed(FailureReason::ExchangeFailed(msg.clone())),
                    AttemptEnd::Retry(AuthError::ExchangeFailed(msg)),
                );
            }
        };
        let record = CredentialRecord::from_token_response(resp, required, epoch_secs());
        let missing = record.missing_scopes(required);
        if !missing.is_empty() {
            let reason = format!(
                "required scopes not granted: {}",
                missing.into_iter().collect::<Vec<_>>().join(" ")
            );
            return (
                AttemptResult::Failed(FailureReason::Denied(reason.clone())),
                AttemptEnd::Retry(AuthError::Denied(reason)),
            );
        }
        if let Err(e) = self.store.lock().await.save(&record) {
            return (AttemptResult::Failed(FailureReason::Storage(e.to_string())), AttemptEnd::Abort(e));
        }
        (AttemptResult::Succeeded, AttemptEnd::Success(record))
    }
}

#[cfg(test)]
#[path = "flow_tests.rs"]
mod tests;

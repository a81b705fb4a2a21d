// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{RawQuery, State};
use axum::http::header::CONNECTION;
use axum::http::{HeaderValue, Request};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use reqwest::Url;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::bind::bind_with_fallback;
use super::page::Page;
use crate::error::AuthError;

/// How long `close` waits for in-flight responses before aborting the server.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of one listener. Binding happens inside [`CallbackListener::start`],
/// so a live handle starts at `Listening`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackFailure {
    /// The user refused consent (`error=access_denied`).
    Denied(String),
    /// Any other provider-reported error.
    Provider { error: String, description: Option<String> },
}

/// Terminal value written once into the listener's slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Completed { code: String },
    Failed(CallbackFailure),
}

/// Result of waiting on a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Callback(CallbackOutcome),
    TimedOut,
    Cancelled,
    /// The server task ended before anything was written to the slot.
    Stopped,
}

/// Query parameters the provider may send to the redirect URI.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        let Ok(url) = Url::parse(&format!("http://callback.invalid/?{query}")) else {
            return params;
        };
        for (key, value) in url.query_pairs() {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

/// State shared between the handle and the server task.
pub(crate) struct Shared {
    expected_state: String,
    slot: Mutex<Option<oneshot::Sender<CallbackOutcome>>>,
    state: Mutex<ListenerState>,
}

impl Shared {
    pub(crate) fn new(expected_state: String) -> (Arc<Self>, oneshot::Receiver<CallbackOutcome>) {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::new(Self {
            expected_state,
            slot: Mutex::new(Some(tx)),
            state: Mutex::new(ListenerState::Listening),
        });
        (shared, rx)
    }

    fn set_state(&self, next: ListenerState) {
        *self.state.lock() = next;
    }

    /// Handle one hit on the callback path. CSRF state is checked before
    /// anything else in the request is looked at.
    pub(crate) fn process(&self, params: CallbackParams) -> Page {
        let state_ok = params
            .state
            .as_deref()
            .is_some_and(|s| constant_time_eq(s, &self.expected_state));
        if !state_ok {
            warn!(err = %AuthError::StateMismatch, "rejected callback");
            return Page::InvalidRequest;
        }

        let (outcome, page, next) = match (params.code, params.error) {
            (Some(code), _) if !code.is_empty() => {
                (CallbackOutcome::Completed { code }, Page::Success, ListenerState::Completed)
            }
            (_, Some(error)) if error == "access_denied" => (
                CallbackOutcome::Failed(CallbackFailure::Denied(
                    params.error_description.unwrap_or(error),
                )),
                Page::Denied,
                ListenerState::Failed,
            ),
            (_, Some(error)) => (
                CallbackOutcome::Failed(CallbackFailure::Provider {
                    error,
                    description: params.error_description,
                }),
                Page::ProviderError,
                ListenerState::Failed,
            ),
            _ => {
                debug!("callback carried neither code nor error");
                return Page::MissingCode;
            }
        };

        let Some(tx) = self.slot.lock().take() else {
            debug!("callback after attempt already completed");
            return Page::AlreadyCompleted;
        };
        self.set_state(next);
        let _ = tx.send(outcome);
        page
    }
}

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

async fn handle_callback(
    State(shared): State<Arc<Shared>>,
    RawQuery(query): RawQuery,
) -> Page {
    shared.process(CallbackParams::from_query(query.as_deref().unwrap_or_default()))
}

async fn close_connection(mut resp: Response) -> Response {
    resp.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
    resp
}

/// Router serving `GET <path>`; every other path is a 404.
pub(crate) fn router(shared: Arc<Shared>, path: &str) -> Router {
    Router::new()
        .route(path, get(handle_callback))
        .with_state(shared)
        .layer(axum::middleware::map_response(close_connection))
        // Span carries only the path: the query holds the code and state.
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
            tracing::info_span!("callback", method = %req.method(), path = %req.uri().path())
        }))
}

/// A short-lived local HTTP server waiting for one OAuth redirect.
pub struct CallbackListener {
    port: u16,
    shared: Arc<Shared>,
    rx: Option<oneshot::Receiver<CallbackOutcome>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CallbackListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackListener")
            .field("port", &self.port)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CallbackListener {
    /// Bind (with port fallback) and start serving `path`, expecting
    /// `expected_state` on every callback.
    pub async fn start(
        host: &str,
        port: u16,
        port_attempts: u16,
        path: &str,
        expected_state: String,
    ) -> Result<Self, AuthError> {
        let listener = bind_with_fallback(host, port, port_attempts).await?;
        let bound = listener
            .local_addr()
            .map_err(|e| AuthError::Bind(format!("local_addr: {e}")))?
            .port();
        let (shared, rx) = Shared::new(expected_state);
        let app = router(Arc::clone(&shared), path);
        let shutdown = CancellationToken::new();
        let sd = shutdown.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app).with_graceful_shutdown(sd.cancelled_owned()).await;
            if let Err(e) = result {
                warn!(err = %e, "callback server error");
            }
        });
        info!(port = bound, path, "callback listener started");
        Ok(Self { port: bound, shared, rx: Some(rx), shutdown, task: Some(task) })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ListenerState {
        *self.shared.state.lock()
    }

    /// Wait for the slot to be written, the deadline to pass, or `cancel`.
    ///
    /// A second call after a terminal result returns [`WaitOutcome::Stopped`].
    pub async fn wait(&mut self, deadline: Instant, cancel: &CancellationToken) -> WaitOutcome {
        let Some(rx) = self.rx.take() else {
            return WaitOutcome::Stopped;
        };
        let raced = tokio::time::timeout_at(deadline, async {
            tokio::select! {
                res = rx => match res {
                    Ok(outcome) => WaitOutcome::Callback(outcome),
                    Err(_) => WaitOutcome::Stopped,
                },
                () = cancel.cancelled() => WaitOutcome::Cancelled,
            }
        })
        .await;
        let outcome = raced.unwrap_or(WaitOutcome::TimedOut);
        match outcome {
            WaitOutcome::TimedOut => self.shared.set_state(ListenerState::TimedOut),
            WaitOutcome::Cancelled => self.shared.set_state(ListenerState::Cancelled),
            _ => {}
        }
        outcome
    }

    /// Stop serving and release the socket. In-flight responses get up to
    /// [`TEARDOWN_TIMEOUT`] to finish before the server task is aborted.
    pub async fn close(mut self) {
        self.shutdown.cancel();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(TEARDOWN_TIMEOUT, &mut task).await.is_err() {
                warn!(port = self.port, "callback server did not drain in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }
        self.shared.set_state(ListenerState::Closed);
        debug!(port = self.port, "callback listener closed");
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;

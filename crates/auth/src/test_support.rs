// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a fake identity provider, a scripted browser,
//! and assertion helpers.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use reqwest::Url;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::{AuthConfig, RedirectPolicy, DEFAULT_MAIL_SCOPES};
use crate::flow::{AuthAttempt, Presenter};
use crate::oauth::ProviderEndpoints;

/// Extension trait to convert any `Display` error into `anyhow::Error`.
/// Replaces `.map_err(|e| anyhow::anyhow!("{e}"))` with `.anyhow()`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

/// JSON body of a successful token response without a `scope` field.
pub fn token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> String {
    let mut body = serde_json::json!({
        "access_token": access,
        "expires_in": expires_in,
        "token_type": "Bearer",
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = refresh.into();
    }
    body.to_string()
}

/// JSON body of a successful token response that reports granted scopes.
pub fn token_body_with_scope(access: &str, refresh: Option<&str>, scope: &str) -> String {
    let mut body: serde_json::Value =
        serde_json::from_str(&token_body(access, refresh, 3600)).unwrap_or_default();
    body["scope"] = scope.into();
    body.to_string()
}

/// JSON body of an OAuth error response.
pub fn error_body(error: &str) -> String {
    serde_json::json!({ "error": error, "error_description": format!("{error} (fake)") })
        .to_string()
}

#[derive(Default)]
struct ProviderState {
    token_responses: Mutex<Vec<(u16, String)>>,
    token_calls: AtomicU32,
    revoke_calls: AtomicU32,
    last_token_form: Mutex<HashMap<String, String>>,
    last_revoked: Mutex<Option<String>>,
}

/// In-process token and revocation endpoints with scripted responses.
///
/// Token responses are served in order; once exhausted the last one repeats.
pub struct FakeProvider {
    addr: SocketAddr,
    state: Arc<ProviderState>,
    task: JoinHandle<()>,
}

impl FakeProvider {
    pub async fn start(token_responses: Vec<(u16, String)>) -> anyhow::Result<Self> {
        let state = Arc::new(ProviderState {
            token_responses: Mutex::new(token_responses),
            ..Default::default()
        });
        let app = Router::new()
            .route("/token", post(token))
            .route("/revoke", post(revoke))
            .with_state(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, state, task })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn endpoints(&self) -> ProviderEndpoints {
        ProviderEndpoints {
            auth_url: format!("{}/auth", self.base_url()),
            token_url: format!("{}/token", self.base_url()),
            revoke_url: Some(format!("{}/revoke", self.base_url())),
        }
    }

    /// Replace the scripted token responses and reset the call counter.
    pub fn script(&self, token_responses: Vec<(u16, String)>) {
        *self.state.token_responses.lock() = token_responses;
        self.state.token_calls.store(0, Ordering::Relaxed);
    }

    pub fn token_calls(&self) -> u32 {
        self.state.token_calls.load(Ordering::Relaxed)
    }

    pub fn revoke_calls(&self) -> u32 {
        self.state.revoke_calls.load(Ordering::Relaxed)
    }

    pub fn last_token_form(&self) -> HashMap<String, String> {
        self.state.last_token_form.lock().clone()
    }

    pub fn last_revoked(&self) -> Option<String> {
        self.state.last_revoked.lock().clone()
    }
}

impl Drop for FakeProvider {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn token(
    State(state): State<Arc<ProviderState>>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, String) {
    let idx = state.token_calls.fetch_add(1, Ordering::Relaxed) as usize;
    *state.last_token_form.lock() = form;
    let responses = state.token_responses.lock();
    let (status, body) = responses
        .get(idx)
        .or_else(|| responses.last())
        .cloned()
        .unwrap_or((500, "{}".to_owned()));
    (StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), body)
}

async fn revoke(
    State(state): State<Arc<ProviderState>>,
    Form(form): Form<HashMap<String, String>>,
) -> StatusCode {
    state.revoke_calls.fetch_add(1, Ordering::Relaxed);
    *state.last_revoked.lock() = form.get("token").cloned();
    StatusCode::OK
}

/// Configuration wired to `provider`, storing credentials under `dir` and
/// listening on an ephemeral loopback port.
pub fn test_config(provider: &FakeProvider, dir: &Path) -> AuthConfig {
    let endpoints = provider.endpoints();
    AuthConfig {
        client_id: Some("test-client".into()),
        client_secret: Some("test-secret".into()),
        redirect_uri: "http://127.0.0.1:0/auth/callback".into(),
        scopes: DEFAULT_MAIL_SCOPES.split(',').map(str::to_owned).collect(),
        calendar_enabled: false,
        calendar_scopes: Vec::new(),
        auth_url: endpoints.auth_url,
        token_url: endpoints.token_url,
        revoke_url: endpoints.revoke_url.unwrap_or_default(),
        credential_path: Some(dir.join("tokens.json")),
        encryption_key: Some("test-encryption-key".into()),
        max_attempts: 3,
        auth_timeout_secs: 10,
        refresh_margin_secs: 60,
        refresh_retries: 2,
        port_attempts: 10,
        redirect_policy: RedirectPolicy::Strict,
        no_pkce: false,
        no_browser: true,
        http_timeout_secs: 5,
    }
}

/// What the simulated user does with one consent URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserAction {
    /// Follow the redirect with a code and the right state.
    Approve,
    /// Refuse consent (`error=access_denied`).
    Deny,
    /// Report a provider error other than a refusal.
    ProviderError,
    /// Hit the redirect with a forged state first, then approve.
    WrongStateThenApprove,
    /// Never come back.
    Ignore,
}

/// A [`Presenter`] that plays a browser following a script, one action per
/// presented URL. Once the script runs out every attempt is ignored.
#[derive(Default)]
pub struct ScriptedBrowser {
    script: Mutex<VecDeque<BrowserAction>>,
    presented: Arc<Mutex<Vec<String>>>,
    pages: Arc<Mutex<Vec<String>>>,
}

impl ScriptedBrowser {
    pub fn new(script: impl IntoIterator<Item = BrowserAction>) -> Self {
        Self { script: Mutex::new(script.into_iter().collect()), ..Default::default() }
    }

    /// URLs handed to the browser, one per attempt.
    pub fn presented(&self) -> Vec<String> {
        self.presented.lock().clone()
    }

    /// Bodies of every callback page the browser received.
    pub fn pages(&self) -> Vec<String> {
        self.pages.lock().clone()
    }
}

impl Presenter for ScriptedBrowser {
    fn present(&self, attempt: &AuthAttempt, url: &str) {
        self.presented.lock().push(url.to_owned());
        let action = self.script.lock().pop_front().unwrap_or(BrowserAction::Ignore);
        let Some((redirect, state)) = redirect_and_state(url) else {
            return;
        };
        let code = format!("code-{}", attempt.number);
        let hits: Vec<String> = match action {
            BrowserAction::Approve => vec![format!("{redirect}?code={code}&state={state}")],
            BrowserAction::Deny => vec![format!("{redirect}?error=access_denied&state={state}")],
            BrowserAction::ProviderError => {
                vec![format!("{redirect}?error=server_error&error_description=boom&state={state}")]
            }
            BrowserAction::WrongStateThenApprove => vec![
                format!("{redirect}?code=forged&state=not-{state}"),
                format!("{redirect}?code={code}&state={state}"),
            ],
            BrowserAction::Ignore => Vec::new(),
        };
        if hits.is_empty() {
            return;
        }
        crate::ensure_crypto();
        let pages = Arc::clone(&self.pages);
        tokio::spawn(async move {
            let client = reqwest::Client::new();
            for hit in hits {
                if let Ok(resp) = client.get(&hit).send().await {
                    if let Ok(body) = resp.text().await {
                        pages.lock().push(body);
                    }
                }
            }
        });
    }
}

fn redirect_and_state(url: &str) -> Option<(String, String)> {
    let url = Url::parse(url).ok()?;
    let mut redirect = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "redirect_uri" => redirect = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }
    Some((redirect?, state?))
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio::net::TcpListener;

use crate::callback::Page;
use crate::test_support::{
    error_body, test_config, token_body, token_body_with_scope, BrowserAction, FakeProvider,
    ScriptedBrowser,
};

use super::*;

struct Fixture {
    _dir: tempfile::TempDir,
    provider: FakeProvider,
    config: AuthConfig,
    tokens: TokenClient,
    store: tokio::sync::Mutex<CredentialStore>,
    pending: Mutex<Option<PendingAttempt>>,
}

impl Fixture {
    async fn new(responses: Vec<(u16, String)>) -> anyhow::Result<Self> {
        Self::with(responses, |_| {}).await
    }

    async fn with(
        responses: Vec<(u16, String)>,
        tweak: impl FnOnce(&mut AuthConfig),
    ) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let provider = FakeProvider::start(responses).await?;
        let mut config = test_config(&provider, dir.path());
        tweak(&mut config);
        let tokens =
            TokenClient::new(config.endpoints(), config.client_credentials(), config.http_timeout())?;
        let store = CredentialStore::open(config.credential_path(), "test-encryption-key")?;
        Ok(Self {
            _dir: dir,
            provider,
            config,
            tokens,
            store: tokio::sync::Mutex::new(store),
            pending: Mutex::new(None),
        })
    }

    fn controller<'a>(&'a self, browser: &'a ScriptedBrowser) -> FlowController<'a> {
        self.controller_with(browser, CancellationToken::new())
    }

    fn controller_with<'a>(
        &'a self,
        browser: &'a ScriptedBrowser,
        cancel: CancellationToken,
    ) -> FlowController<'a> {
        FlowController::new(&self.config, &self.tokens, &self.store, browser, &self.pending, cancel)
    }

    async fn stored(&self) -> Option<CredentialRecord> {
        self.store.lock().await.load()
    }
}

fn ok_token() -> (u16, String) {
    (200, token_body("at-1", Some("rt-1"), 3600))
}

const SHORT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn approve_on_first_attempt_persists_credentials() -> anyhow::Result<()> {
    let fx = Fixture::new(vec![ok_token()]).await?;
    let browser = ScriptedBrowser::new([BrowserAction::Approve]);
    let mut flow = fx.controller(&browser);

    let record = flow.authenticate(3, SHORT).await?;
    assert_eq!(record.access_token, "at-1");
    assert_eq!(record.refresh_token.as_deref(), Some("rt-1"));
    assert_eq!(flow.attempts().len(), 1);
    assert_eq!(flow.attempts()[0].result, AttemptResult::Succeeded);
    assert_eq!(fx.stored().await, Some(record));
    assert!(fx.pending.lock().is_none());

    let form = fx.provider.last_token_form();
    assert_eq!(form.get("code").map(String::as_str), Some("code-1"));
    assert!(form.contains_key("code_verifier"));
    Ok(())
}

#[tokio::test]
async fn denial_then_approval_takes_two_attempts() -> anyhow::Result<()> {
    let fx = Fixture::new(vec![ok_token()]).await?;
    let browser = ScriptedBrowser::new([BrowserAction::Deny, BrowserAction::Approve]);
    let mut flow = fx.controller(&browser);

    flow.authenticate(3, SHORT).await?;
    let attempts = flow.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(
        attempts[0].result,
        AttemptResult::Failed(FailureReason::Denied("access_denied".into()))
    );
    assert_eq!(attempts[1].result, AttemptResult::Succeeded);
    assert_ne!(attempts[0].state_token, attempts[1].state_token);
    assert_eq!(fx.provider.token_calls(), 1);
    assert_eq!(browser.presented().len(), 2);
    Ok(())
}

#[tokio::test]
async fn forged_state_is_ignored_within_the_same_attempt() -> anyhow::Result<()> {
    let fx = Fixture::new(vec![ok_token()]).await?;
    let browser = ScriptedBrowser::new([BrowserAction::WrongStateThenApprove]);
    let mut flow = fx.controller(&browser);

    flow.authenticate(1, SHORT).await?;
    assert_eq!(flow.attempts().len(), 1);
    assert_eq!(fx.provider.last_token_form().get("code").map(String::as_str), Some("code-1"));
    let pages = browser.pages();
    assert!(pages.iter().any(|p| p.contains(Page::InvalidRequest.title())));
    Ok(())
}

#[tokio::test]
async fn every_attempt_denied_surfaces_denied() -> anyhow::Result<()> {
    let fx = Fixture::new(vec![ok_token()]).await?;
    let browser = ScriptedBrowser::new([BrowserAction::Deny, BrowserAction::Deny]);
    let mut flow = fx.controller(&browser);

    let err = flow.authenticate(2, SHORT).await.expect_err("denied twice");
    assert!(matches!(err, AuthError::Denied(_)), "{err:?}");
    assert_eq!(flow.attempts().len(), 2);
    assert_eq!(fx.provider.token_calls(), 0);
    assert_eq!(fx.stored().await, None);
    Ok(())
}

#[tokio::test]
async fn provider_error_keeps_description() -> anyhow::Result<()> {
    let fx = Fixture::new(vec![ok_token()]).await?;
    let browser = ScriptedBrowser::new([BrowserAction::ProviderError]);
    let mut flow = fx.controller(&browser);

    let err = flow.authenticate(1, SHORT).await.expect_err("provider error");
    assert_eq!(err, AuthError::Provider("server_error: boom".into()));
    Ok(())
}

#[tokio::test]
async fn ignored_attempt_times_out_at_deadline() -> anyhow::Result<()> {
    let fx = Fixture::new(vec![ok_token()]).await?;
    let browser = ScriptedBrowser::new([]);
    let mut flow = fx.controller(&browser);

    let timeout = Duration::from_millis(300);
    let started = Instant::now();
    let err = flow.authenticate(1, timeout).await.expect_err("no callback");
    assert_eq!(err, AuthError::TimedOut(timeout));
    assert!(started.elapsed() >= timeout);
    assert_eq!(flow.attempts()[0].result, AttemptResult::TimedOut);
    Ok(())
}

#[tokio::test]
async fn cancel_aborts_without_further_attempts() -> anyhow::Result<()> {
    let fx = Fixture::new(vec![ok_token()]).await?;
    let browser = ScriptedBrowser::new([]);
    let cancel = CancellationToken::new();
    let mut flow = fx.controller_with(&browser, cancel.clone());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });
    let err = flow.authenticate(3, Duration::from_secs(30)).await.expect_err("cancelled");
    trigger.await?;
    assert_eq!(err, AuthError::Cancelled);
    assert_eq!(flow.attempts().len(), 1);
    assert_eq!(flow.attempts()[0].result, AttemptResult::Cancelled);
    Ok(())
}

#[tokio::test]
async fn exchange_failures_on_every_attempt_report_unreachable() -> anyhow::Result<()> {
    let fx = Fixture::new(vec![(503, "unavailable".into())]).await?;
    let browser = ScriptedBrowser::new([BrowserAction::Approve, BrowserAction::Approve]);
    let mut flow = fx.controller(&browser);

    let err = flow.authenticate(2, SHORT).await.expect_err("exchange down");
    assert!(matches!(err, AuthError::Unreachable(_)), "{err:?}");
    assert_eq!(fx.provider.token_calls(), 2);
    assert!(matches!(
        flow.attempts()[1].result,
        AttemptResult::Failed(FailureReason::ExchangeFailed(_))
    ));
    Ok(())
}

#[tokio::test]
async fn rejected_code_then_success() -> anyhow::Result<()> {
    let fx = Fixture::new(vec![(400, error_body("invalid_grant")), ok_token()]).await?;
    let browser = ScriptedBrowser::new([BrowserAction::Approve, BrowserAction::Approve]);
    let mut flow = fx.controller(&browser);

    let record = flow.authenticate(2, SHORT).await?;
    assert_eq!(record.access_token, "at-1");
    assert_eq!(flow.attempts().len(), 2);
    Ok(())
}

#[tokio::test]
async fn partial_grant_counts_as_failed_attempt() -> anyhow::Result<()> {
    let partial = token_body_with_scope(
        "at-partial",
        Some("rt-partial"),
        "https://www.googleapis.com/auth/gmail.readonly",
    );
    let fx = Fixture::new(vec![(200, partial)]).await?;
    let browser = ScriptedBrowser::new([BrowserAction::Approve]);
    let mut flow = fx.controller(&browser);

    let err = flow.authenticate(1, SHORT).await.expect_err("scopes missing");
    assert!(err.to_string().contains("gmail.send"), "{err}");
    assert_eq!(fx.stored().await, None);
    Ok(())
}

#[tokio::test]
async fn strict_policy_aborts_on_fallback_port() -> anyhow::Result<()> {
    let occupied = TcpListener::bind("127.0.0.1:0").await?;
    let port = occupied.local_addr()?.port();
    let fx = Fixture::with(vec![ok_token()], |c| {
        c.redirect_uri = format!("http://127.0.0.1:{port}/auth/callback");
        c.port_attempts = 5;
    })
    .await?;
    let browser = ScriptedBrowser::new([BrowserAction::Approve]);
    let mut flow = fx.controller(&browser);

    let err = flow.authenticate(3, SHORT).await.expect_err("mismatch");
    match err {
        AuthError::RedirectMismatch { configured, bound_port, suggested } => {
            assert_eq!(configured, format!("http://127.0.0.1:{port}/auth/callback"));
            assert_ne!(bound_port, port);
            assert_eq!(suggested, format!("http://127.0.0.1:{bound_port}/auth/callback"));
        }
        other => panic!("expected RedirectMismatch, got {other:?}"),
    }
    assert!(flow.attempts().is_empty(), "mismatch must not consume an attempt");
    assert!(browser.presented().is_empty());
    Ok(())
}

#[tokio::test]
async fn follow_policy_uses_fallback_port() -> anyhow::Result<()> {
    let occupied = TcpListener::bind("127.0.0.1:0").await?;
    let port = occupied.local_addr()?.port();
    let fx = Fixture::with(vec![ok_token()], |c| {
        c.redirect_uri = format!("http://127.0.0.1:{port}/auth/callback");
        c.port_attempts = 5;
        c.redirect_policy = RedirectPolicy::FollowBoundPort;
    })
    .await?;
    let browser = ScriptedBrowser::new([BrowserAction::Approve]);
    let mut flow = fx.controller(&browser);

    flow.authenticate(1, SHORT).await?;
    let bound = flow.attempts()[0].listener_port;
    assert_ne!(bound, port);
    let form = fx.provider.last_token_form();
    assert_eq!(
        form.get("redirect_uri").cloned(),
        Some(format!("http://127.0.0.1:{bound}/auth/callback"))
    );
    Ok(())
}

#[tokio::test]
async fn exhausted_ports_abort_with_bind_conflict() -> anyhow::Result<()> {
    let occupied = TcpListener::bind("127.0.0.1:0").await?;
    let port = occupied.local_addr()?.port();
    let fx = Fixture::with(vec![ok_token()], |c| {
        c.redirect_uri = format!("http://127.0.0.1:{port}/auth/callback");
        c.port_attempts = 1;
    })
    .await?;
    let browser = ScriptedBrowser::new([BrowserAction::Approve]);
    let mut flow = fx.controller(&browser);

    let err = flow.authenticate(3, SHORT).await.expect_err("port busy");
    assert!(matches!(err, AuthError::BindConflict { ref ports, .. } if ports == &vec![port]), "{err:?}");
    assert!(flow.attempts().is_empty());
    Ok(())
}

#[tokio::test]
async fn pkce_can_be_turned_off() -> anyhow::Result<()> {
    let fx = Fixture::with(vec![ok_token()], |c| c.no_pkce = true).await?;
    let browser = ScriptedBrowser::new([BrowserAction::Approve]);
    let mut flow = fx.controller(&browser);

    flow.authenticate(1, SHORT).await?;
    assert!(!fx.provider.last_token_form().contains_key("code_verifier"));
    assert!(!browser.presented()[0].contains("code_challenge"));
    Ok(())
}

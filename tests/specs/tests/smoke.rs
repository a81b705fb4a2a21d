// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `mailcal` binary.

use std::time::Duration;

use mailcal_auth::test_support::{token_body, FakeProvider};
use mailcal_specs::{approve, exit_code, MailcalEnv};

const TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::test]
async fn status_on_empty_store() -> anyhow::Result<()> {
    let provider = FakeProvider::start(vec![]).await?;
    let env = MailcalEnv::new(&provider)?;

    let out = env.run(&["status"], TIMEOUT).await?;
    assert_eq!(exit_code(&out), 3);
    assert_eq!(String::from_utf8(out.stdout)?.trim(), "not authenticated");

    let out = env.run(&["status", "--json"], TIMEOUT).await?;
    let json: serde_json::Value = serde_json::from_slice(&out.stdout)?;
    assert_eq!(json["status"], "unauthenticated");
    Ok(())
}

#[tokio::test]
async fn token_on_empty_store_asks_for_login() -> anyhow::Result<()> {
    let provider = FakeProvider::start(vec![]).await?;
    let env = MailcalEnv::new(&provider)?;

    let out = env.run(&["token"], TIMEOUT).await?;
    assert_eq!(exit_code(&out), 3);
    assert!(out.stdout.is_empty());
    assert!(String::from_utf8(out.stderr)?.contains("mailcal login"));
    assert_eq!(provider.token_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn logout_on_empty_store_is_noop() -> anyhow::Result<()> {
    let provider = FakeProvider::start(vec![]).await?;
    let env = MailcalEnv::new(&provider)?;

    let out = env.run(&["logout"], TIMEOUT).await?;
    assert_eq!(exit_code(&out), 0);
    assert_eq!(provider.revoke_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn missing_encryption_key_is_config_error() -> anyhow::Result<()> {
    let provider = FakeProvider::start(vec![]).await?;
    let env = MailcalEnv::new(&provider)?.without("TOKEN_ENCRYPTION_KEY");

    let out = env.run(&["status"], TIMEOUT).await?;
    assert_eq!(exit_code(&out), 2);
    assert!(String::from_utf8(out.stderr)?.contains("TOKEN_ENCRYPTION_KEY"));
    Ok(())
}

#[tokio::test]
async fn login_token_logout_round_trip() -> anyhow::Result<()> {
    let provider =
        FakeProvider::start(vec![(200, token_body("smoke-at", Some("smoke-rt"), 3600))]).await?;
    let env = MailcalEnv::new(&provider)?;

    let mut login = env.spawn_login()?;
    let url = login.consent_url(TIMEOUT).await?;
    assert!(url.starts_with(&provider.endpoints().auth_url));
    let page = approve(&url, "smoke-code").await?;
    assert!(page.contains("window.close"), "confirmation page closes itself");
    let (code, stdout) = login.finish(TIMEOUT).await?;
    assert_eq!(code, 0, "login stdout: {stdout}");
    assert!(stdout.contains("authenticated"));
    assert_eq!(provider.last_token_form().get("code").map(String::as_str), Some("smoke-code"));
    assert!(env.credential_path().exists());

    let out = env.run(&["token"], TIMEOUT).await?;
    assert_eq!(exit_code(&out), 0);
    assert_eq!(String::from_utf8(out.stdout)?.trim(), "smoke-at");

    let out = env.run(&["status", "--json"], TIMEOUT).await?;
    let json: serde_json::Value = serde_json::from_slice(&out.stdout)?;
    assert_eq!(json["status"], "authenticated");

    let out = env.run(&["logout"], TIMEOUT).await?;
    assert_eq!(exit_code(&out), 0);
    assert_eq!(provider.last_revoked().as_deref(), Some("smoke-rt"));
    assert!(!env.credential_path().exists());

    let out = env.run(&["status"], TIMEOUT).await?;
    assert_eq!(exit_code(&out), 3);
    Ok(())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const NOW: u64 = 1_800_000_000;

fn record(expires_at: u64, refresh: bool) -> CredentialRecord {
    CredentialRecord {
        access_token: "at".into(),
        refresh_token: refresh.then(|| "rt".to_owned()),
        expires_at,
        scopes: BTreeSet::from(["scope-a".to_owned()]),
        token_type: "Bearer".into(),
    }
}

#[test]
fn pending_takes_precedence() {
    let pending = PendingAttempt { number: 2, port: 8001, deadline_epoch: NOW + 300 };
    let status = AuthStatus::derive(Some(&pending), Some(&record(NOW + 10, true)), None, NOW);
    assert_eq!(status, AuthStatus::Pending { deadline: NOW + 300, port: 8001, attempt: 2 });
}

#[yare::parameterized(
    valid = { NOW + 10, true, "authenticated" },
    expired_refreshable = { NOW, true, "expired" },
    expired_dead = { NOW - 1, false, "expired" },
)]
fn record_states(expires_at: u64, refresh: bool, expected: &str) {
    let status = AuthStatus::derive(None, Some(&record(expires_at, refresh)), None, NOW);
    assert_eq!(status.as_str(), expected);
}

#[test]
fn expired_reports_refreshability() {
    let status = AuthStatus::derive(None, Some(&record(NOW - 1, false)), None, NOW);
    assert_eq!(status, AuthStatus::Expired { refreshable: false });
}

#[test]
fn no_record_with_last_error_is_error() {
    let status = AuthStatus::derive(None, None, Some("consent denied"), NOW);
    assert_eq!(status, AuthStatus::Error { reason: "consent denied".into() });
    assert_eq!(AuthStatus::derive(None, None, None, NOW), AuthStatus::Unauthenticated);
}

#[test]
fn serializes_with_status_tag() -> anyhow::Result<()> {
    let status = AuthStatus::derive(None, Some(&record(NOW + 10, true)), None, NOW);
    let json: serde_json::Value = serde_json::to_value(&status)?;
    assert_eq!(json["status"], "authenticated");
    assert_eq!(json["expires_at"], NOW + 10);
    assert_eq!(json["scopes"][0], "scope-a");
    assert_eq!(serde_json::to_value(AuthStatus::Unauthenticated)?["status"], "unauthenticated");
    Ok(())
}

#[test]
fn display_is_human_readable() {
    assert_eq!(AuthStatus::Unauthenticated.to_string(), "not authenticated");
    assert_eq!(
        AuthStatus::Expired { refreshable: true }.to_string(),
        "expired (will refresh)"
    );
}

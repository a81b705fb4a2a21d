// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::credential::CredentialRecord;
use crate::flow::PendingAttempt;

/// Authentication state for display. Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuthStatus {
    Unauthenticated,
    /// A flow is waiting for the browser.
    Pending { deadline: u64, port: u16, attempt: u32 },
    Authenticated { expires_at: u64, scopes: BTreeSet<String> },
    Expired { refreshable: bool },
    Error { reason: String },
}

impl AuthStatus {
    /// Derive the status from the in-flight attempt, the stored record and
    /// the last flow error, in that order of precedence.
    pub fn derive(
        pending: Option<&PendingAttempt>,
        record: Option<&CredentialRecord>,
        last_error: Option<&str>,
        now: u64,
    ) -> Self {
        if let Some(p) = pending {
            return Self::Pending { deadline: p.deadline_epoch, port: p.port, attempt: p.number };
        }
        match record {
            Some(r) if r.is_expired_at(now) => Self::Expired { refreshable: r.can_refresh() },
            Some(r) => Self::Authenticated { expires_at: r.expires_at, scopes: r.scopes.clone() },
            None => match last_error {
                Some(reason) => Self::Error { reason: reason.to_owned() },
                None => Self::Unauthenticated,
            },
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Pending { .. } => "pending",
            Self::Authenticated { .. } => "authenticated",
            Self::Expired { .. } => "expired",
            Self::Error { .. } => "error",
        }
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => f.write_str("not authenticated"),
            Self::Pending { deadline, port, attempt } => write!(
                f,
                "waiting for authorization (attempt {attempt}, port {port}, deadline {deadline})"
            ),
            Self::Authenticated { expires_at, scopes } => {
                write!(f, "authenticated (expires at {expires_at}, {} scopes)", scopes.len())
            }
            Self::Expired { refreshable: true } => f.write_str("expired (will refresh)"),
            Self::Expired { refreshable: false } => f.write_str("expired (login required)"),
            Self::Error { reason } => write!(f, "error: {reason}"),
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;

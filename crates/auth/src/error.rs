// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::time::Duration;

/// Errors surfaced by the authorization subsystem.
///
/// Listener and token-endpoint failures are classified into these variants by
/// the flow controller and the refresher; raw transport errors never escape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Every candidate callback port was already in use.
    BindConflict { host: String, ports: Vec<u16> },
    /// The callback listener could not bind for a reason other than a conflict.
    Bind(String),
    /// The listener bound a port other than the one in the registered redirect URI.
    RedirectMismatch { configured: String, bound_port: u16, suggested: String },
    /// A callback carried a missing or wrong CSRF state. Never terminal.
    StateMismatch,
    /// The user refused consent.
    Denied(String),
    /// The provider reported an error other than a refusal.
    Provider(String),
    /// The authorization code could not be exchanged (one attempt).
    ExchangeFailed(String),
    /// Every attempt ended in an exchange or listener failure.
    Unreachable(String),
    /// No callback arrived before the deadline.
    TimedOut(Duration),
    /// The flow was cancelled through the session.
    Cancelled,
    /// Another authentication flow is already running on this session.
    InProgress,
    /// Refresh failed for a reason worth retrying later; credentials kept.
    RefreshTransient(String),
    /// The refresh grant is dead; credentials were cleared.
    RefreshRevoked(String),
    /// The stored credential blob could not be decrypted or parsed.
    DecryptFailure,
    /// No usable credential; the user must log in.
    AuthRequired,
    /// Reading or writing the credential file failed.
    Storage(String),
    /// Invalid configuration.
    Config(String),
}

impl AuthError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BindConflict { .. } => "BIND_CONFLICT",
            Self::Bind(_) => "BIND_FAILED",
            Self::RedirectMismatch { .. } => "REDIRECT_MISMATCH",
            Self::StateMismatch => "STATE_MISMATCH",
            Self::Denied(_) => "DENIED",
            Self::Provider(_) => "PROVIDER_ERROR",
            Self::ExchangeFailed(_) => "EXCHANGE_FAILED",
            Self::Unreachable(_) => "UNREACHABLE",
            Self::TimedOut(_) => "TIMED_OUT",
            Self::Cancelled => "CANCELLED",
            Self::InProgress => "IN_PROGRESS",
            Self::RefreshTransient(_) => "REFRESH_TRANSIENT",
            Self::RefreshRevoked(_) => "REFRESH_REVOKED",
            Self::DecryptFailure => "DECRYPT_FAILURE",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::Storage(_) => "STORAGE",
            Self::Config(_) => "CONFIG",
        }
    }

    /// Whether calling the same operation again later may succeed without
    /// user intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExchangeFailed(_)
                | Self::RefreshTransient(_)
                | Self::TimedOut(_)
                | Self::Unreachable(_)
                | Self::InProgress
        )
    }

    /// Human-readable guidance for fixing the problem, when there is any.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::BindConflict { host, ports } => Some(format!(
                "free one of the ports on {host} ({}) or configure a different redirect URI",
                join_ports(ports)
            )),
            Self::RedirectMismatch { suggested, configured, .. } => Some(format!(
                "add {suggested} as an authorized redirect URI in the provider console, \
                 or free the port used by {configured}"
            )),
            Self::Denied(_) => Some("run the login again and grant the requested permissions".into()),
            Self::TimedOut(_) => {
                Some("complete the consent screen in the browser before the timeout".into())
            }
            Self::Unreachable(_) | Self::RefreshTransient(_) => {
                Some("check network connectivity to the identity provider and retry".into())
            }
            Self::RefreshRevoked(_) | Self::AuthRequired => {
                Some("run `mailcal login` to authenticate".into())
            }
            Self::InProgress => Some("wait for the running login to finish or cancel it".into()),
            Self::Config(_) => Some("check the mailcal configuration and environment".into()),
            _ => None,
        }
    }
}

fn join_ports(ports: &[u16]) -> String {
    ports.iter().map(u16::to_string).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BindConflict { host, ports } => {
                write!(f, "no free callback port on {host}, tried {}", join_ports(ports))
            }
            Self::Bind(msg) => write!(f, "callback listener bind failed: {msg}"),
            Self::RedirectMismatch { configured, bound_port, .. } => write!(
                f,
                "callback listener bound port {bound_port}, which does not match redirect URI {configured}"
            ),
            Self::StateMismatch => f.write_str("callback state did not match the pending attempt"),
            Self::Denied(msg) => write!(f, "authorization denied: {msg}"),
            Self::Provider(msg) => write!(f, "provider reported an error: {msg}"),
            Self::ExchangeFailed(msg) => write!(f, "code exchange failed: {msg}"),
            Self::Unreachable(msg) => write!(f, "identity provider unreachable: {msg}"),
            Self::TimedOut(d) => write!(f, "no authorization callback within {}s", d.as_secs_f32()),
            Self::Cancelled => f.write_str("authentication cancelled"),
            Self::InProgress => f.write_str("an authentication flow is already in progress"),
            Self::RefreshTransient(msg) => write!(f, "token refresh failed, retry later: {msg}"),
            Self::RefreshRevoked(msg) => write!(f, "refresh token revoked: {msg}"),
            Self::DecryptFailure => f.write_str("stored credentials could not be decrypted"),
            Self::AuthRequired => f.write_str("not authenticated"),
            Self::Storage(msg) => write!(f, "credential storage error: {msg}"),
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

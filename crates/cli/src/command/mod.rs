// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI subcommands: `login`, `logout`, `status`, `token`.

pub mod login;
pub mod logout;
pub mod status;
pub mod token;

use mailcal_auth::{AuthError, AuthSession};

/// Success.
pub const EXIT_OK: i32 = 0;
/// The operation failed.
pub const EXIT_FAILURE: i32 = 1;
/// Invalid configuration.
pub const EXIT_CONFIG: i32 = 2;
/// No usable credentials; run `mailcal login`.
pub const EXIT_UNAUTHENTICATED: i32 = 3;

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Authorize mailcal in the browser and store the tokens.
    Login(login::LoginArgs),
    /// Revoke the stored grant and delete local tokens.
    Logout,
    /// Show the current authentication status.
    Status(status::StatusArgs),
    /// Print a valid access token, refreshing it if needed.
    Token,
}

/// Run a subcommand. Returns a process exit code.
pub async fn run(session: &AuthSession, command: &Command) -> i32 {
    match command {
        Command::Login(args) => login::run(session, args).await,
        Command::Logout => logout::run(session).await,
        Command::Status(args) => status::run(session, args).await,
        Command::Token => token::run(session).await,
    }
}

/// Map an error to the process exit code.
pub fn exit_code(err: &AuthError) -> i32 {
    match err {
        AuthError::Config(_) | AuthError::RedirectMismatch { .. } => EXIT_CONFIG,
        AuthError::AuthRequired | AuthError::RefreshRevoked(_) => EXIT_UNAUTHENTICATED,
        _ => EXIT_FAILURE,
    }
}

/// Print an error and its remediation hint to stderr, returning the exit code.
pub fn report(err: &AuthError) -> i32 {
    eprintln!("error: {err}");
    if let Some(hint) = err.remediation() {
        eprintln!("hint: {hint}");
    }
    exit_code(err)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

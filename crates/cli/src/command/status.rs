// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `mailcal status`: print the authentication status.

use mailcal_auth::{AuthSession, AuthStatus};

use super::{EXIT_FAILURE, EXIT_OK, EXIT_UNAUTHENTICATED};

#[derive(Debug, clap::Args)]
pub struct StatusArgs {
    /// Print the status as JSON.
    #[arg(long)]
    pub json: bool,
}

pub async fn run(session: &AuthSession, args: &StatusArgs) -> i32 {
    let status = session.status().await;
    if args.json {
        match serde_json::to_string(&status) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("error: {e}");
                return EXIT_FAILURE;
            }
        }
    } else {
        println!("{status}");
    }
    status_code(&status)
}

/// Exit code for scripts: success while a usable or refreshable credential
/// exists (or a login is in flight).
pub fn status_code(status: &AuthStatus) -> i32 {
    match status {
        AuthStatus::Authenticated { .. }
        | AuthStatus::Pending { .. }
        | AuthStatus::Expired { refreshable: true } => EXIT_OK,
        AuthStatus::Unauthenticated
        | AuthStatus::Expired { refreshable: false }
        | AuthStatus::Error { .. } => EXIT_UNAUTHENTICATED,
    }
}

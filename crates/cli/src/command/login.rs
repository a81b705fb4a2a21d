// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `mailcal login`: run the interactive consent flow.

use mailcal_auth::AuthSession;
use tracing::info;

use super::{report, EXIT_OK};

#[derive(Debug, clap::Args)]
pub struct LoginArgs {
    /// Authorize again even if valid credentials are stored.
    #[arg(long)]
    pub force: bool,
}

pub async fn run(session: &AuthSession, args: &LoginArgs) -> i32 {
    if !args.force {
        if let Ok(token) = session.valid_credential().await {
            println!("Already authenticated (token expires at {}).", token.expires_at());
            return EXIT_OK;
        }
    }

    let login = session.login();
    tokio::pin!(login);
    let result = tokio::select! {
        result = &mut login => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, cancelling login");
            session.cancel_authentication();
            login.await
        }
    };

    match result {
        Ok(_) => {
            println!("{}", session.status().await);
            EXIT_OK
        }
        Err(e) => report(&e),
    }
}

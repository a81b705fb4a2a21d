// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mailcal_auth::AuthSession;

use super::{report, EXIT_OK};

/// `mailcal token`: print a valid access token on stdout for scripting.
/// Never starts an interactive login.
pub async fn run(session: &AuthSession) -> i32 {
    match session.valid_credential().await {
        Ok(token) => {
            println!("{}", token.secret());
            EXIT_OK
        }
        Err(e) => report(&e),
    }
}

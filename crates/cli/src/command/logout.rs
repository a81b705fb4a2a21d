// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mailcal_auth::AuthSession;

use super::{report, EXIT_OK};

/// `mailcal logout`: revoke at the provider (best effort) and clear.
pub async fn run(session: &AuthSession) -> i32 {
    match session.logout().await {
        Ok(()) => {
            println!("Logged out.");
            EXIT_OK
        }
        Err(e) => report(&e),
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth2 authorization and token lifecycle for the mailcal integration server.
//!
//! The rest of the application talks to [`AuthSession`] only: ask it for a
//! valid [`AccessToken`], run an interactive login, log out, or read the
//! current [`AuthStatus`] for display.

pub mod callback;
pub mod config;
pub mod credential;
pub mod error;
pub mod flow;
pub mod oauth;
pub mod refresh;
pub mod session;
pub mod status;
pub mod test_support;

pub use config::{AuthConfig, RedirectPolicy};
pub use credential::{AccessToken, CredentialRecord};
pub use error::AuthError;
pub use session::AuthSession;
pub use status::AuthStatus;

use std::sync::Once;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consent URL construction with CSRF state and PKCE (RFC 7636).

use std::collections::BTreeSet;
use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use reqwest::Url;
use sha2::{Digest, Sha256};

use super::ProviderEndpoints;
use crate::error::AuthError;

/// Generate a PKCE code verifier (43-128 char URL-safe random string).
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute code_challenge = base64url_nopad(sha256(verifier)).
pub fn compute_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate a CSRF state token: 256 bits from the thread CSPRNG, base64url.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A consent URL together with the secrets the flow must keep to finish it.
#[derive(Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub redirect_uri: String,
    pub pkce_verifier: Option<String>,
}

impl fmt::Debug for AuthorizationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationRequest")
            .field("redirect_uri", &self.redirect_uri)
            .field("pkce", &self.pkce_verifier.is_some())
            .finish_non_exhaustive()
    }
}

/// Build the consent URL with a fresh state token and, when `pkce` is set, a
/// fresh code verifier.
///
/// `redirect_uri` goes into the query exactly as given; it must match a URI
/// registered with the provider byte for byte.
pub fn build(
    endpoints: &ProviderEndpoints,
    client_id: &str,
    scopes: &BTreeSet<String>,
    redirect_uri: &str,
    pkce: bool,
) -> Result<AuthorizationRequest, AuthError> {
    let verifier = pkce.then(generate_code_verifier);
    build_with_state(endpoints, client_id, scopes, redirect_uri, generate_state(), verifier)
}

/// Build the consent URL around a state token (and verifier) the caller drew
/// earlier, e.g. before the callback listener was bound.
pub fn build_with_state(
    endpoints: &ProviderEndpoints,
    client_id: &str,
    scopes: &BTreeSet<String>,
    redirect_uri: &str,
    state: String,
    pkce_verifier: Option<String>,
) -> Result<AuthorizationRequest, AuthError> {
    let mut url = Url::parse(&endpoints.auth_url)
        .map_err(|e| AuthError::Config(format!("invalid auth URL {}: {e}", endpoints.auth_url)))?;
    let scope = scopes.iter().map(String::as_str).collect::<Vec<_>>().join(" ");

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &scope)
            .append_pair("state", &state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("include_granted_scopes", "true");
        if let Some(ref verifier) = pkce_verifier {
            query
                .append_pair("code_challenge", &compute_code_challenge(verifier))
                .append_pair("code_challenge_method", "S256");
        }
    }

    Ok(AuthorizationRequest {
        url: url.into(),
        state,
        redirect_uri: redirect_uri.to_owned(),
        pkce_verifier,
    })
}

#[cfg(test)]
#[path = "authorize_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token endpoint client: code exchange, refresh and revocation.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

use super::{ClientCredentials, ProviderEndpoints, TokenErrorResponse, TokenResponse};
use crate::error::AuthError;

/// OAuth error codes after which the same grant will never succeed.
const TERMINAL_GRANT_ERRORS: &[&str] = &["invalid_grant", "invalid_client", "unauthorized_client"];

/// Classified failure from the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEndpointError {
    /// The grant or client is dead; retrying cannot help.
    Terminal { error: String, description: Option<String> },
    /// Network trouble, 5xx, 429 or a response we could not understand.
    Transient(String),
}

impl fmt::Display for TokenEndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminal { error, description: Some(d) } => write!(f, "{error}: {d}"),
            Self::Terminal { error, description: None } => f.write_str(error),
            Self::Transient(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for TokenEndpointError {}

#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    credentials: ClientCredentials,
}

impl TokenClient {
    pub fn new(
        endpoints: ProviderEndpoints,
        credentials: ClientCredentials,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        crate::ensure_crypto();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { http, endpoints, credentials })
    }

    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    pub fn client_id(&self) -> &str {
        &self.credentials.client_id
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, TokenEndpointError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }
        self.post_token(&form).await
    }

    /// Redeem a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, TokenEndpointError> {
        self.post_token(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)]).await
    }

    /// Revoke a token at the provider. Without a revoke endpoint this is a no-op.
    pub async fn revoke(&self, token: &str) -> Result<(), TokenEndpointError> {
        let Some(ref url) = self.endpoints.revoke_url else {
            return Ok(());
        };
        let resp = self
            .http
            .post(url)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| TokenEndpointError::Transient(format!("HTTP error: {e}")))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(err) => Err(TokenEndpointError::Terminal {
                error: err.error,
                description: err.error_description,
            }),
            Err(_) => Err(TokenEndpointError::Transient(format!("HTTP {status}: {body}"))),
        }
    }

    async fn post_token(&self, grant: &[(&str, &str)]) -> Result<TokenResponse, TokenEndpointError> {
        let mut form: Vec<(&str, &str)> = grant.iter().copied().collect();
        form.push(("client_id", self.credentials.client_id.as_str()));
        if let Some(secret) = self.credentials.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        let grant_type = form.first().map(|(_, v)| *v).unwrap_or_default();
        debug!(grant_type, url = %self.endpoints.token_url, "token endpoint request");

        let resp = self
            .http
            .post(&self.endpoints.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenEndpointError::Transient(format!("HTTP error: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| TokenEndpointError::Transient(format!("read body: {e}")))?;
        classify_response(status, &body)
    }
}

/// Interpret a token endpoint response.
pub(crate) fn classify_response(
    status: StatusCode,
    body: &str,
) -> Result<TokenResponse, TokenEndpointError> {
    if status.is_success() {
        return serde_json::from_str::<TokenResponse>(body)
            .map_err(|e| TokenEndpointError::Transient(format!("parse response: {e}")));
    }
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) if TERMINAL_GRANT_ERRORS.contains(&err.error.as_str()) => {
            Err(TokenEndpointError::Terminal { error: err.error, description: err.error_description })
        }
        Ok(err) => Err(TokenEndpointError::Transient(format!(
            "HTTP {status} {}: {}",
            err.error,
            err.error_description.unwrap_or_default()
        ))),
        Err(_) => Err(TokenEndpointError::Transient(format!("HTTP {status}: {body}"))),
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;

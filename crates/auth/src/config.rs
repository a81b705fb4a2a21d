// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::oauth::{ClientCredentials, ProviderEndpoints};

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8000/auth/callback";
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

pub const DEFAULT_MAIL_SCOPES: &str = "https://www.googleapis.com/auth/gmail.readonly,\
https://www.googleapis.com/auth/gmail.send,\
https://www.googleapis.com/auth/gmail.labels,\
https://www.googleapis.com/auth/gmail.modify";

pub const DEFAULT_CALENDAR_SCOPES: &str = "https://www.googleapis.com/auth/calendar.readonly,\
https://www.googleapis.com/auth/calendar.events";

/// What to do when the callback listener cannot bind the port named in the
/// registered redirect URI and falls back to a neighbour.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RedirectPolicy {
    /// Refuse to continue and tell the user which URI to register.
    #[default]
    Strict,
    /// Send the provider the bound port and warn that it must be registered.
    FollowBoundPort,
}

/// Configuration for the authorization subsystem.
#[derive(Clone, clap::Args)]
pub struct AuthConfig {
    /// OAuth client ID issued by the provider console.
    #[arg(long, env = "GOOGLE_CLIENT_ID", hide_env_values = true)]
    pub client_id: Option<String>,

    /// OAuth client secret (installed-app clients still carry one).
    #[arg(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Redirect URI registered with the provider. The callback listener binds its host and port.
    #[arg(long, env = "GOOGLE_REDIRECT_URI", default_value = DEFAULT_REDIRECT_URI)]
    pub redirect_uri: String,

    /// Mail scopes to request (comma separated).
    #[arg(long, env = "GMAIL_API_SCOPES", value_delimiter = ',', default_value = DEFAULT_MAIL_SCOPES)]
    pub scopes: Vec<String>,

    /// Also request calendar scopes.
    #[arg(long = "calendar", env = "CALENDAR_API_ENABLED")]
    pub calendar_enabled: bool,

    /// Calendar scopes to request when `--calendar` is set (comma separated).
    #[arg(long, env = "CALENDAR_API_SCOPES", value_delimiter = ',', default_value = DEFAULT_CALENDAR_SCOPES)]
    pub calendar_scopes: Vec<String>,

    /// Provider authorization endpoint.
    #[arg(long, env = "MAILCAL_AUTH_URL", default_value = GOOGLE_AUTH_URL)]
    pub auth_url: String,

    /// Provider token endpoint (code exchange and refresh).
    #[arg(long, env = "MAILCAL_TOKEN_URL", default_value = GOOGLE_TOKEN_URL)]
    pub token_url: String,

    /// Provider revocation endpoint used on logout. Empty disables revocation.
    #[arg(long, env = "MAILCAL_REVOKE_URL", default_value = GOOGLE_REVOKE_URL)]
    pub revoke_url: String,

    /// Encrypted credential file. Defaults to `<state dir>/tokens.json`.
    #[arg(long, env = "TOKEN_STORAGE_PATH")]
    pub credential_path: Option<PathBuf>,

    /// Secret used to derive the credential file encryption key.
    #[arg(long, env = "TOKEN_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// Authentication attempts per login.
    #[arg(long, env = "MAILCAL_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    /// Seconds to wait for the browser callback in each attempt.
    #[arg(long, env = "MAILCAL_AUTH_TIMEOUT_SECS", default_value_t = 300)]
    pub auth_timeout_secs: u64,

    /// Refresh access tokens this many seconds before they expire.
    #[arg(long, env = "MAILCAL_REFRESH_MARGIN_SECS", default_value_t = 60)]
    pub refresh_margin_secs: u64,

    /// Retries for transient refresh failures within one credential request.
    #[arg(long, env = "MAILCAL_REFRESH_RETRIES", default_value_t = 2)]
    pub refresh_retries: u32,

    /// Consecutive ports to try when the redirect port is in use.
    #[arg(long, env = "MAILCAL_PORT_ATTEMPTS", default_value_t = 10)]
    pub port_attempts: u16,

    /// Behaviour when the callback listener binds a fallback port.
    #[arg(long, env = "MAILCAL_REDIRECT_POLICY", value_enum, default_value_t = RedirectPolicy::Strict)]
    pub redirect_policy: RedirectPolicy,

    /// Do not send a PKCE challenge.
    #[arg(long, env = "MAILCAL_NO_PKCE")]
    pub no_pkce: bool,

    /// Print the consent URL instead of launching a browser.
    #[arg(long, env = "MAILCAL_NO_BROWSER")]
    pub no_browser: bool,

    /// Timeout for token endpoint requests, in seconds.
    #[arg(long, env = "MAILCAL_HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.required_scopes())
            .field("credential_path", &self.credential_path())
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "[REDACTED]"))
            .field("max_attempts", &self.max_attempts)
            .field("auth_timeout_secs", &self.auth_timeout_secs)
            .field("redirect_policy", &self.redirect_policy)
            .finish_non_exhaustive()
    }
}

/// Host, port and path the callback listener serves, parsed from the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub uri: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl RedirectTarget {
    pub fn parse(uri: &str) -> anyhow::Result<Self> {
        let url = Url::parse(uri).map_err(|e| anyhow::anyhow!("invalid redirect URI {uri}: {e}"))?;
        if url.scheme() != "http" {
            anyhow::bail!("redirect URI must use http for a local listener: {uri}");
        }
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("redirect URI has no host: {uri}"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow::anyhow!("redirect URI has no port: {uri}"))?;
        let path = match url.path() {
            "" => "/".to_owned(),
            p => p.to_owned(),
        };
        Ok(Self { uri: uri.to_owned(), host, port, path })
    }

    /// The same URI with its port replaced.
    pub fn with_port(&self, port: u16) -> String {
        match Url::parse(&self.uri) {
            Ok(mut url) => {
                let _ = url.set_port(Some(port));
                url.to_string()
            }
            Err(_) => self.uri.clone(),
        }
    }
}

impl AuthConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.client_id.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("--client-id (GOOGLE_CLIENT_ID) is required");
        }
        if self.client_secret.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("--client-secret (GOOGLE_CLIENT_SECRET) is required");
        }
        if self.encryption_key.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("--encryption-key (TOKEN_ENCRYPTION_KEY) is required");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("--max-attempts must be at least 1");
        }
        if self.port_attempts == 0 {
            anyhow::bail!("--port-attempts must be at least 1");
        }
        if self.auth_timeout_secs == 0 {
            anyhow::bail!("--auth-timeout-secs must be at least 1");
        }
        if self.required_scopes().is_empty() {
            anyhow::bail!("at least one scope must be requested");
        }
        RedirectTarget::parse(&self.redirect_uri)?;
        for (name, url) in [("--auth-url", &self.auth_url), ("--token-url", &self.token_url)] {
            Url::parse(url).map_err(|e| anyhow::anyhow!("invalid {name} {url}: {e}"))?;
        }
        Ok(())
    }

    /// Scopes a stored credential must cover: mail scopes, plus calendar scopes when enabled.
    pub fn required_scopes(&self) -> BTreeSet<String> {
        let calendar = if self.calendar_enabled { self.calendar_scopes.as_slice() } else { &[] };
        self.scopes
            .iter()
            .chain(calendar)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn redirect_target(&self) -> anyhow::Result<RedirectTarget> {
        RedirectTarget::parse(&self.redirect_uri)
    }

    pub fn credential_path(&self) -> PathBuf {
        self.credential_path.clone().unwrap_or_else(|| state_dir().join("tokens.json"))
    }

    pub fn endpoints(&self) -> ProviderEndpoints {
        ProviderEndpoints {
            auth_url: self.auth_url.clone(),
            token_url: self.token_url.clone(),
            revoke_url: Some(self.revoke_url.clone()).filter(|u| !u.is_empty()),
        }
    }

    pub fn client_credentials(&self) -> ClientCredentials {
        ClientCredentials {
            client_id: self.client_id.clone().unwrap_or_default(),
            client_secret: self.client_secret.clone().filter(|s| !s.is_empty()),
        }
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Resolve the state directory for credential data.
///
/// Checks `MAILCAL_STATE_DIR`, then `$XDG_STATE_HOME/mailcal`,
/// then `$HOME/.local/state/mailcal`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MAILCAL_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("mailcal");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/mailcal");
    }
    PathBuf::from(".mailcal")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Runs the real `mailcal` binary as a subprocess against an in-process fake
//! identity provider, with an isolated credential file per test.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use mailcal_auth::test_support::FakeProvider;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

pub use mailcal_auth::ensure_crypto;

/// Resolve the path to the compiled `mailcal` binary.
pub fn mailcal_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("mailcal")
}

/// Environment for one `mailcal` invocation: provider URLs, client
/// credentials, and a private credential file.
pub struct MailcalEnv {
    dir: tempfile::TempDir,
    vars: Vec<(&'static str, String)>,
}

impl MailcalEnv {
    pub fn new(provider: &FakeProvider) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let endpoints = provider.endpoints();
        let vars = vec![
            ("GOOGLE_CLIENT_ID", "smoke-client".to_owned()),
            ("GOOGLE_CLIENT_SECRET", "smoke-secret".to_owned()),
            ("GOOGLE_REDIRECT_URI", "http://127.0.0.1:0/auth/callback".to_owned()),
            ("TOKEN_ENCRYPTION_KEY", "smoke-encryption-key".to_owned()),
            ("TOKEN_STORAGE_PATH", dir.path().join("tokens.json").to_string_lossy().into_owned()),
            ("MAILCAL_AUTH_URL", endpoints.auth_url),
            ("MAILCAL_TOKEN_URL", endpoints.token_url),
            ("MAILCAL_REVOKE_URL", endpoints.revoke_url.unwrap_or_default()),
            ("MAILCAL_AUTH_TIMEOUT_SECS", "10".to_owned()),
            ("MAILCAL_NO_BROWSER", "true".to_owned()),
            ("MAILCAL_LOG_FORMAT", "text".to_owned()),
            ("MAILCAL_LOG_LEVEL", "warn".to_owned()),
        ];
        Ok(Self { dir, vars })
    }

    /// Drop one variable, e.g. to exercise config validation.
    pub fn without(mut self, name: &str) -> Self {
        self.vars.retain(|(k, _)| *k != name);
        self
    }

    pub fn credential_path(&self) -> PathBuf {
        self.dir.path().join("tokens.json")
    }

    fn command(&self, args: &[&str]) -> anyhow::Result<Command> {
        let binary = mailcal_binary();
        anyhow::ensure!(binary.exists(), "mailcal binary not found at {}", binary.display());
        let mut cmd = Command::new(binary);
        cmd.env_clear().envs(self.vars.iter().map(|(k, v)| (*k, v.as_str()))).args(args);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        Ok(cmd)
    }

    /// Run to completion and capture output.
    pub async fn run(&self, args: &[&str], timeout: Duration) -> anyhow::Result<Output> {
        let output = self.command(args)?.output();
        Ok(tokio::time::timeout(timeout, output).await??)
    }

    /// Start `mailcal login` without waiting for it.
    pub fn spawn_login(&self) -> anyhow::Result<LoginProcess> {
        let mut child =
            self.command(&["login"])?.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("login stderr not captured"))?;
        Ok(LoginProcess { child, stderr: Some(BufReader::new(stderr)) })
    }
}

/// A running `mailcal login`, killed on drop.
pub struct LoginProcess {
    child: Child,
    stderr: Option<BufReader<ChildStderr>>,
}

impl LoginProcess {
    /// Read stderr until the consent URL is printed.
    pub async fn consent_url(&mut self, timeout: Duration) -> anyhow::Result<String> {
        let Some(mut stderr) = self.stderr.take() else {
            anyhow::bail!("consent URL already read");
        };
        let find = async {
            let mut line = String::new();
            loop {
                line.clear();
                if stderr.read_line(&mut line).await? == 0 {
                    anyhow::bail!("login exited before printing a consent URL");
                }
                let trimmed = line.trim();
                if trimmed.starts_with("http") && trimmed.contains("state=") {
                    return Ok(trimmed.to_owned());
                }
            }
        };
        let url = tokio::time::timeout(timeout, find).await??;
        // Keep draining so the child never blocks on a full pipe.
        tokio::spawn(async move {
            let mut sink = String::new();
            while matches!(stderr.read_line(&mut sink).await, Ok(n) if n > 0) {
                sink.clear();
            }
        });
        Ok(url)
    }

    /// Wait for exit, returning the exit code and stdout.
    pub async fn finish(self, timeout: Duration) -> anyhow::Result<(i32, String)> {
        let output = tokio::time::timeout(timeout, self.child.wait_with_output()).await??;
        Ok((output.status.code().unwrap_or(-1), String::from_utf8(output.stdout)?))
    }
}

/// Play the browser: follow the consent URL's redirect with `code` and the
/// right state. Returns the callback page body.
pub async fn approve(consent_url: &str, code: &str) -> anyhow::Result<String> {
    ensure_crypto();
    let url = reqwest::Url::parse(consent_url)?;
    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .ok_or_else(|| anyhow::anyhow!("consent URL lacks {name}"))
    };
    let mut callback = reqwest::Url::parse(&param("redirect_uri")?)?;
    callback.query_pairs_mut().append_pair("code", code).append_pair("state", &param("state")?);
    Ok(reqwest::get(callback).await?.text().await?)
}

/// Exit code of a finished process, -1 if killed by a signal.
pub fn exit_code(output: &Output) -> i32 {
    output.status.code().unwrap_or(-1)
}

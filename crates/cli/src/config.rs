// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use mailcal_auth::AuthConfig;

use crate::command::Command;

/// Google OAuth login and token management for the mailcal server.
#[derive(Debug, Parser)]
#[command(name = "mailcal", version, about)]
pub struct Config {
    #[command(flatten)]
    pub auth: AuthConfig,

    /// Log format (json or text).
    #[arg(long, env = "MAILCAL_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "MAILCAL_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other} (expected json or text)"),
        }
        self.auth.validate()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::debug;

use mailcal::command::{self, report};
use mailcal::config::Config;
use mailcal_auth::AuthSession;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(command::EXIT_CONFIG);
    }

    init_tracing(&config);
    debug!(config = ?config.auth, "starting");

    let session = match AuthSession::from_config(config.auth.clone()) {
        Ok(s) => s,
        Err(e) => std::process::exit(report(&e)),
    };
    std::process::exit(command::run(&session, &config.command).await);
}

/// Logs go to stderr so `mailcal token` output stays clean.
fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

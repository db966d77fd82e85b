// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use hearth::config::DaemonConfig;

#[tokio::main]
async fn main() {
    // Missing/invalid flags are configuration errors: exit 1, not clap's 2.
    let config = match DaemonConfig::try_parse() {
        Ok(config) => config,
        Err(e) if e.use_stderr() => {
            eprintln!("{e}");
            std::process::exit(1);
        }
        Err(e) => {
            // --help / --version
            let _ = e.print();
            std::process::exit(0);
        }
    };

    // One JSON object per line on stdout; LOG_LEVEL floors emission.
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = hearth::run(config).await {
        error!("fatal: {e}");
        std::process::exit(e.exit_code());
    }
}

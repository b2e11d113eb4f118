// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! nostrd - Nostr relay daemon

use std::process::ExitCode;

use clap::Parser;
use nostrd_relay::{Config, NodeSupervisor};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("nostrd_relay=info".parse().unwrap()))
        .init();

    let config: Config = Config::parse();
    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    info!("nostrd v{}", env!("CARGO_PKG_VERSION"));

    match NodeSupervisor::start(config).await {
        Ok(node) => {
            info!("Listening on {}", node.local_addr());

            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");

            node.shutdown();
            node.join().await;

            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to start relay: {e}");
            ExitCode::FAILURE
        }
    }
}

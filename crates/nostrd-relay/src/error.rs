// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay error

use nostrd_store::StoreError;
use thiserror::Error;

/// Relay error
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    #[error(transparent)]
    IO(#[from] std::io::Error),
    /// WebSocket error
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Outbound channel closed
    #[error("outbound channel closed")]
    ChannelClosed,
    /// Socket write deadline exceeded
    #[error("write timeout")]
    WriteTimeout,
}

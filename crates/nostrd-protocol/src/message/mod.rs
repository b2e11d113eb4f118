// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Messages

use std::fmt;

pub mod client;
pub mod relay;
pub mod subscription;

pub use self::client::ClientMessage;
pub use self::relay::{MachineReadablePrefix, RelayMessage};
pub use self::subscription::SubscriptionId;

/// Messages error
#[derive(Debug)]
pub enum MessageHandleError {
    /// Json error
    Json(serde_json::Error),
    /// Message has an invalid format
    InvalidMessageFormat,
    /// Unknown command verb
    UnknownCommand(String),
}

impl std::error::Error for MessageHandleError {}

impl fmt::Display for MessageHandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "Json: {e}"),
            Self::InvalidMessageFormat => write!(f, "Message has an invalid format"),
            Self::UnknownCommand(cmd) => write!(f, "Unknown command: {cmd}"),
        }
    }
}

impl From<serde_json::Error> for MessageHandleError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

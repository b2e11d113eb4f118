// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Store error

use thiserror::Error;

/// Store error
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend error
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
    /// The backend is temporarily unavailable
    #[error("storage unavailable")]
    Unavailable,
}

impl StoreError {
    /// Wrap a backend-specific error
    pub fn backend<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(e))
    }

    /// Check if the operation may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

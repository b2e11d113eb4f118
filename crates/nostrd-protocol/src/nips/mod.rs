// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! NIPs
//!
//! <https://github.com/nostr-protocol/nips>

pub mod nip11;
pub mod nip42;

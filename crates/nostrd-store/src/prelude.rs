// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Prelude

#![allow(unknown_lints)]
#![allow(ambiguous_glob_reexports)]
#![doc(hidden)]

pub use nostrd_protocol::prelude::*;

pub use crate::error::*;
pub use crate::events::*;
pub use crate::memory::*;
pub use crate::*;

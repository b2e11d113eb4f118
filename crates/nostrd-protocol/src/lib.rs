// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Nostr wire protocol types for the nostrd relay

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

pub use secp256k1;

pub mod coordinate;
pub mod event;
pub mod filter;
pub mod key;
pub mod message;
pub mod nips;
pub mod prelude;
pub mod types;
pub mod util;

pub use self::coordinate::Coordinate;
pub use self::event::builder::EventBuilder;
pub use self::event::id::EventId;
pub use self::event::kind::Kind;
pub use self::event::tag::{Tag, Tags};
pub use self::event::Event;
pub use self::filter::{Filter, SingleLetterTag};
pub use self::key::{Keys, PublicKey};
pub use self::message::{ClientMessage, MachineReadablePrefix, RelayMessage, SubscriptionId};
pub use self::types::Timestamp;
pub use self::util::{JsonUtil, SECP256K1};
